// src/plane.rs

use crate::error::{Result, VqmError};

/// A single image plane of real-valued samples, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VqmError::Precondition(format!(
                "Plane dimensions must be non-zero (got {}x{})",
                width, height
            )));
        }
        if data.len() != width * height {
            return Err(VqmError::Precondition(format!(
                "Plane of {}x{} needs {} samples, got {}",
                width,
                height,
                width * height,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Wraps samples whose length is already known to be `width * height`.
    pub(crate) fn from_raw(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self { width, height, data }
    }

    /// Builds a plane by evaluating `f(x, y)` at every sample.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    /// Widens 8-bit samples (as produced by a rawvideo decoder) into a plane.
    pub fn from_bytes(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        Self::new(width, height, bytes.iter().map(|&b| f32::from(b)).collect())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn same_size(&self, other: &Plane) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn contains(&self, rect: Rect) -> bool {
        rect.x + rect.width <= self.width && rect.y + rect.height <= self.height
    }

    /// Pixel-wise `|self - other|`.
    pub fn abs_diff(&self, other: &Plane) -> Result<Plane> {
        if !self.same_size(other) {
            return Err(VqmError::Precondition(format!(
                "Cannot difference a {}x{} plane with a {}x{} plane",
                self.width, self.height, other.width, other.height
            )));
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .collect();
        Ok(Plane::from_raw(self.width, self.height, data))
    }

    /// First and second raw moments of the samples inside `rect`.
    ///
    /// `rect` must lie inside the plane; block grids built with
    /// [`BlockGrid::new`] guarantee this for planes of the grid's size.
    pub fn block_moments(&self, rect: Rect) -> Moments {
        debug_assert!(self.contains(rect), "{:?} outside plane", rect);
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in rect.y..rect.y + rect.height {
            let start = y * self.width + rect.x;
            for &v in &self.data[start..start + rect.width] {
                let v = f64::from(v);
                sum += v;
                sum_sq += v * v;
            }
        }
        let n = rect.area() as f64;
        Moments {
            mean: sum / n,
            mean_sq: sum_sq / n,
        }
    }

    pub fn block_mean(&self, rect: Rect) -> f64 {
        debug_assert!(self.contains(rect), "{:?} outside plane", rect);
        let mut sum = 0.0f64;
        for y in rect.y..rect.y + rect.height {
            let start = y * self.width + rect.x;
            sum += self.data[start..start + rect.width]
                .iter()
                .map(|&v| f64::from(v))
                .sum::<f64>();
        }
        sum / rect.area() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Mean and mean-of-squares of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub mean: f64,
    pub mean_sq: f64,
}

impl Moments {
    /// `E[X²] - E[X]²`, clamped at zero so rounding never yields a negative variance.
    pub fn variance(&self) -> f64 {
        (self.mean_sq - self.mean * self.mean).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn add(&mut self, other: Moments) {
        self.mean += other.mean;
        self.mean_sq += other.mean_sq;
    }

    /// Divides accumulated sums by `count`, turning them into temporal averages.
    pub fn averaged(self, count: usize) -> Moments {
        let n = count as f64;
        Moments {
            mean: self.mean / n,
            mean_sq: self.mean_sq / n,
        }
    }
}

/// Non-overlapping square tiling of a plane, enumerated row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    cols: usize,
    rows: usize,
    size: usize,
}

impl BlockGrid {
    /// Fails unless both dimensions are non-zero multiples of `size`.
    pub fn new(width: usize, height: usize, size: usize) -> Result<Self> {
        if size == 0 || width == 0 || height == 0 {
            return Err(VqmError::Precondition(format!(
                "Cannot tile a {}x{} plane with {}x{} blocks",
                width, height, size, size
            )));
        }
        if width % size != 0 || height % size != 0 {
            return Err(VqmError::Precondition(format!(
                "Plane size {}x{} is not divisible by block size {}",
                width, height, size
            )));
        }
        Ok(Self {
            cols: width / size,
            rows: height / size,
            size,
        })
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block_size(&self) -> usize {
        self.size
    }

    /// Width of the plane this grid tiles.
    pub fn width(&self) -> usize {
        self.cols * self.size
    }

    pub fn height(&self) -> usize {
        self.rows * self.size
    }

    /// Fails unless `plane` is exactly the size this grid tiles.
    pub fn check_plane(&self, plane: &Plane) -> Result<()> {
        if plane.width() != self.width() || plane.height() != self.height() {
            return Err(VqmError::Precondition(format!(
                "{}x{} grid of {}x{} blocks does not tile a {}x{} plane",
                self.cols,
                self.rows,
                self.block_size(),
                self.block_size(),
                plane.width(),
                plane.height()
            )));
        }
        Ok(())
    }

    pub fn rect(&self, index: usize) -> Rect {
        let x = (index % self.cols) * self.size;
        let y = (index / self.cols) * self.size;
        Rect::new(x, y, self.size, self.size)
    }

    pub fn rects(&self) -> impl Iterator<Item = Rect> + '_ {
        (0..self.len()).map(move |i| self.rect(i))
    }
}

/// One decoded frame: luma plus the two chroma planes, all the same size.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub y: Plane,
    pub cb: Plane,
    pub cr: Plane,
}

impl Frame {
    pub fn new(y: Plane, cb: Plane, cr: Plane) -> Result<Self> {
        if !y.same_size(&cb) || !y.same_size(&cr) {
            return Err(VqmError::Precondition(format!(
                "Frame planes differ in size: Y {}x{}, Cb {}x{}, Cr {}x{}",
                y.width(),
                y.height(),
                cb.width(),
                cb.height(),
                cr.width(),
                cr.height()
            )));
        }
        Ok(Self { y, cb, cr })
    }

    pub fn uniform(width: usize, height: usize, y: f32, cb: f32, cr: f32) -> Self {
        Self {
            y: Plane::filled(width, height, y),
            cb: Plane::filled(width, height, cb),
            cr: Plane::filled(width, height, cr),
        }
    }

    pub fn width(&self) -> usize {
        self.y.width()
    }

    pub fn height(&self) -> usize {
        self.y.height()
    }
}

/// Time-aligned reference and processed frames making up one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSlice {
    reference: Vec<Frame>,
    processed: Vec<Frame>,
}

impl FrameSlice {
    pub fn new(reference: Vec<Frame>, processed: Vec<Frame>) -> Result<Self> {
        if reference.is_empty() {
            return Err(VqmError::Precondition("Frame slice is empty".to_string()));
        }
        if reference.len() != processed.len() {
            return Err(VqmError::Precondition(format!(
                "Slice frame count mismatch: {} reference, {} processed",
                reference.len(),
                processed.len()
            )));
        }
        let (w, h) = (reference[0].width(), reference[0].height());
        for (i, frame) in reference.iter().chain(processed.iter()).enumerate() {
            if frame.width() != w || frame.height() != h {
                return Err(VqmError::Precondition(format!(
                    "Frame {} is {}x{}, expected {}x{}",
                    i % reference.len(),
                    frame.width(),
                    frame.height(),
                    w,
                    h
                )));
            }
        }
        Ok(Self {
            reference,
            processed,
        })
    }

    pub fn reference(&self) -> &[Frame] {
        &self.reference
    }

    pub fn processed(&self) -> &[Frame] {
        &self.processed
    }

    pub fn n_frames(&self) -> usize {
        self.reference.len()
    }

    pub fn width(&self) -> usize {
        self.reference[0].width()
    }

    pub fn height(&self) -> usize {
        self.reference[0].height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_block_has_zero_variance() {
        let plane = Plane::filled(16, 16, 3.5);
        let m = plane.block_moments(Rect::new(8, 0, 8, 8));
        assert_eq!(m.mean, 3.5);
        assert_eq!(m.mean_sq, 12.25);
        assert_eq!(m.variance(), 0.0);
        assert_eq!(m.std_dev(), 0.0);
    }

    #[test]
    fn negative_variance_is_clamped() {
        let m = Moments {
            mean: 10.0,
            mean_sq: 99.999_999_999,
        };
        assert_eq!(m.variance(), 0.0);
    }

    #[test]
    fn block_moments_only_read_the_rect() {
        let plane = Plane::from_fn(8, 8, |x, y| if x < 4 && y < 4 { 2.0 } else { 100.0 });
        let m = plane.block_moments(Rect::new(0, 0, 4, 4));
        assert_eq!(m.mean, 2.0);
        assert_eq!(m.variance(), 0.0);
        assert_eq!(plane.block_mean(Rect::new(4, 4, 4, 4)), 100.0);
    }

    #[test]
    fn two_level_block_std_dev() {
        // half 0, half 4 -> mean 2, variance 4
        let plane = Plane::from_fn(4, 4, |x, _| if x < 2 { 0.0 } else { 4.0 });
        let m = plane.block_moments(Rect::new(0, 0, 4, 4));
        assert_eq!(m.mean, 2.0);
        assert_eq!(m.std_dev(), 2.0);
    }

    #[test]
    fn grid_rejects_misaligned_planes() {
        assert!(BlockGrid::new(16, 16, 8).is_ok());
        assert!(matches!(
            BlockGrid::new(20, 16, 8),
            Err(VqmError::Precondition(_))
        ));
        assert!(BlockGrid::new(0, 16, 8).is_err());
    }

    #[test]
    fn grid_enumerates_row_major() {
        let grid = BlockGrid::new(16, 8, 4).unwrap();
        assert_eq!(grid.len(), 8);
        assert_eq!(grid.rect(0), Rect::new(0, 0, 4, 4));
        assert_eq!(grid.rect(3), Rect::new(12, 0, 4, 4));
        assert_eq!(grid.rect(4), Rect::new(0, 4, 4, 4));
        assert_eq!(grid.rects().count(), 8);

        let plane = Plane::filled(16, 8, 0.0);
        assert!(grid.rects().all(|r| plane.contains(r)));
        assert!(!plane.contains(Rect::new(14, 4, 4, 4)));
    }

    #[test]
    fn grid_only_accepts_its_own_plane_size() {
        let grid = BlockGrid::new(16, 8, 4).unwrap();
        assert_eq!((grid.width(), grid.height()), (16, 8));
        assert!(grid.check_plane(&Plane::filled(16, 8, 0.0)).is_ok());
        assert!(matches!(
            grid.check_plane(&Plane::filled(32, 8, 0.0)),
            Err(VqmError::Precondition(_))
        ));
        assert!(grid.check_plane(&Plane::filled(16, 4, 0.0)).is_err());
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = Plane::filled(4, 4, 10.0);
        let b = Plane::filled(4, 4, 25.0);
        assert_eq!(a.abs_diff(&b).unwrap(), Plane::filled(4, 4, 15.0));
        assert_eq!(b.abs_diff(&a).unwrap(), Plane::filled(4, 4, 15.0));
        assert!(a.abs_diff(&Plane::filled(8, 4, 0.0)).is_err());
    }

    #[test]
    fn plane_rejects_wrong_sample_count() {
        assert!(Plane::new(4, 4, vec![0.0; 15]).is_err());
        assert!(Plane::from_bytes(2, 2, &[1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn slice_validation() {
        let f = Frame::uniform(16, 16, 0.0, 0.0, 0.0);
        assert!(FrameSlice::new(vec![], vec![]).is_err());
        assert!(FrameSlice::new(vec![f.clone()], vec![f.clone(), f.clone()]).is_err());
        let small = Frame::uniform(8, 8, 0.0, 0.0, 0.0);
        assert!(FrameSlice::new(vec![f.clone(), f.clone()], vec![f.clone(), small]).is_err());
        let slice = FrameSlice::new(vec![f.clone(), f.clone()], vec![f.clone(), f]).unwrap();
        assert_eq!(slice.n_frames(), 2);
        assert_eq!((slice.width(), slice.height()), (16, 16));
    }

    #[test]
    fn frame_rejects_mismatched_chroma() {
        let y = Plane::filled(16, 16, 0.0);
        let c = Plane::filled(8, 8, 0.0);
        assert!(Frame::new(y, c.clone(), c).is_err());
    }
}
