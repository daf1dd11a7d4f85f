// src/compare.rs
//
// Comparison and shaping functions shared by every feature.

/// A magnitude floored at a strictly positive perceptibility threshold.
///
/// The ratio and log comparisons only accept this type, so a denominator
/// can never be zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Thresholded(f64);

impl Thresholded {
    pub fn get(self) -> f64 {
        self.0
    }

    /// Quotient of two floored magnitudes; strictly positive when both are.
    pub fn ratio(self, denominator: Thresholded) -> Thresholded {
        Thresholded(self.0 / denominator.0)
    }

    pub fn product(self, other: Thresholded) -> Thresholded {
        Thresholded(self.0 * other.0)
    }
}

/// Replaces values below `t` with `t`. `t` must be positive.
pub fn perc_thresh(d: f64, t: f64) -> Thresholded {
    debug_assert!(t > 0.0, "perceptibility threshold must be positive");
    Thresholded(if d >= t { d } else { t })
}

/// Squared Euclidean distance between `(fo1, fo2)` and `(fp1, fp2)`.
pub fn euclidean_sq(fo1: f64, fo2: f64, fp1: f64, fp2: f64) -> f64 {
    let t1 = fo1 - fp1;
    let t2 = fo2 - fp2;
    t1 * t1 + t2 * t2
}

pub fn ratio_comp(orig: Thresholded, processed: Thresholded) -> f64 {
    (processed.0 - orig.0) / orig.0
}

pub fn log_comp(orig: Thresholded, processed: Thresholded) -> f64 {
    (processed.0 / orig.0).log10()
}

/// Keeps only negative (degrading) deviations.
pub fn loss(d: f64) -> f64 {
    if d > 0.0 { 0.0 } else { d }
}

/// Keeps only positive (added) deviations.
pub fn gain(d: f64) -> f64 {
    if d < 0.0 { 0.0 } else { d }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 9] = [-1e9, -42.5, -1.0, -1e-12, 0.0, 1e-12, 0.75, 12.0, 3e7];

    #[test]
    fn loss_and_gain_partition_the_value() {
        for d in SAMPLES {
            assert_eq!(loss(d) + gain(d), d);
            assert!(loss(d) <= 0.0);
            assert!(gain(d) >= 0.0);
            assert_eq!(loss(loss(d)), loss(d));
            assert_eq!(gain(gain(d)), gain(d));
        }
    }

    #[test]
    fn threshold_floors_values() {
        for d in SAMPLES {
            for t in [0.5, 3.0, 8.0, 12.0] {
                let v = perc_thresh(d, t).get();
                assert!(v >= t);
                if d >= t {
                    assert_eq!(v, d);
                }
            }
        }
        assert_eq!(perc_thresh(f64::NAN, 3.0).get(), 3.0);
    }

    #[test]
    fn comparisons_stay_finite_on_zero_inputs() {
        let orig = perc_thresh(0.0, 12.0);
        let processed = perc_thresh(0.0, 12.0);
        assert_eq!(ratio_comp(orig, processed), 0.0);
        assert_eq!(log_comp(orig, processed), 0.0);

        let sharper = perc_thresh(24.0, 12.0);
        assert_eq!(ratio_comp(orig, sharper), 1.0);
        assert!((log_comp(orig, sharper) - 2f64.log10()).abs() < 1e-12);
        assert_eq!(ratio_comp(sharper, orig), -0.5);
    }

    #[test]
    fn guarded_ratio_and_product_remain_positive() {
        let a = perc_thresh(0.0, 3.0);
        let b = perc_thresh(1e6, 3.0);
        assert!(a.ratio(b).get() > 0.0);
        assert!(b.ratio(a).get().is_finite());
        assert_eq!(a.product(a).get(), 9.0);
    }

    #[test]
    fn euclidean_distance() {
        assert_eq!(euclidean_sq(0.0, 0.0, 3.0, 4.0), 25.0);
        assert_eq!(euclidean_sq(1.5, -2.0, 1.5, -2.0), 0.0);
    }
}
