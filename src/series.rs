// src/series.rs

use crate::error::VqmError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The seven parameters tracked over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    ChromaSpread,
    ChromaExtreme,
    SiLoss,
    SiGain,
    HvLoss,
    HvGain,
    CtAtiGain,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::ChromaSpread,
        Feature::ChromaExtreme,
        Feature::SiLoss,
        Feature::SiGain,
        Feature::HvLoss,
        Feature::HvGain,
        Feature::CtAtiGain,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::ChromaSpread => "chroma_spread",
            Feature::ChromaExtreme => "chroma_extreme",
            Feature::SiLoss => "si_loss",
            Feature::SiGain => "si_gain",
            Feature::HvLoss => "hv_loss",
            Feature::HvGain => "hv_gain",
            Feature::CtAtiGain => "ct_ati_gain",
        }
    }

    /// Chroma parameters are sampled once per frame, the rest once per slice.
    pub fn is_per_frame(self) -> bool {
        matches!(self, Feature::ChromaSpread | Feature::ChromaExtreme)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = VqmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| VqmError::Parse(format!("Unknown feature: {}", s)))
    }
}

/// Everything one slice contributes to the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceFeatures {
    pub n_frames: usize,
    /// One value per frame of the slice.
    pub chroma_spread: Vec<f64>,
    /// One value per frame of the slice.
    pub chroma_extreme: Vec<f64>,
    pub si_loss: f64,
    pub si_gain: f64,
    pub hv_loss: f64,
    pub hv_gain: f64,
    pub ct_ati_gain: f64,
}

impl SliceFeatures {
    pub fn values(&self, feature: Feature) -> &[f64] {
        match feature {
            Feature::ChromaSpread => &self.chroma_spread,
            Feature::ChromaExtreme => &self.chroma_extreme,
            Feature::SiLoss => std::slice::from_ref(&self.si_loss),
            Feature::SiGain => std::slice::from_ref(&self.si_gain),
            Feature::HvLoss => std::slice::from_ref(&self.hv_loss),
            Feature::HvGain => std::slice::from_ref(&self.hv_gain),
            Feature::CtAtiGain => std::slice::from_ref(&self.ct_ati_gain),
        }
    }
}

/// Append-only time series of every feature, in slice order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSeries {
    chroma_spread: Vec<f64>,
    chroma_extreme: Vec<f64>,
    si_loss: Vec<f64>,
    si_gain: Vec<f64>,
    hv_loss: Vec<f64>,
    hv_gain: Vec<f64>,
    ct_ati_gain: Vec<f64>,
    n_frames: Vec<usize>,
}

impl FeatureSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a whole slice. Either every series grows or none does.
    pub fn commit(&mut self, slice: &SliceFeatures) {
        self.chroma_spread.extend_from_slice(&slice.chroma_spread);
        self.chroma_extreme.extend_from_slice(&slice.chroma_extreme);
        self.si_loss.push(slice.si_loss);
        self.si_gain.push(slice.si_gain);
        self.hv_loss.push(slice.hv_loss);
        self.hv_gain.push(slice.hv_gain);
        self.ct_ati_gain.push(slice.ct_ati_gain);
        self.n_frames.push(slice.n_frames);
    }

    pub fn series(&self, feature: Feature) -> &[f64] {
        match feature {
            Feature::ChromaSpread => &self.chroma_spread,
            Feature::ChromaExtreme => &self.chroma_extreme,
            Feature::SiLoss => &self.si_loss,
            Feature::SiGain => &self.si_gain,
            Feature::HvLoss => &self.hv_loss,
            Feature::HvGain => &self.hv_gain,
            Feature::CtAtiGain => &self.ct_ati_gain,
        }
    }

    pub fn frame_counts(&self) -> &[usize] {
        &self.n_frames
    }

    pub fn slice_count(&self) -> usize {
        self.n_frames.len()
    }

    pub fn total_frames(&self) -> usize {
        self.n_frames.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.n_frames.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(n: usize, v: f64) -> SliceFeatures {
        SliceFeatures {
            n_frames: n,
            chroma_spread: vec![v; n],
            chroma_extreme: vec![-v; n],
            si_loss: -v,
            si_gain: v,
            hv_loss: -2.0 * v,
            hv_gain: 2.0 * v,
            ct_ati_gain: 3.0 * v,
        }
    }

    #[test]
    fn feature_names_round_trip() {
        for f in Feature::ALL {
            assert_eq!(f.name().parse::<Feature>().unwrap(), f);
            assert_eq!(f.to_string(), f.name());
        }
        assert!("vqm".parse::<Feature>().is_err());
    }

    #[test]
    fn commit_appends_in_order() {
        let mut series = FeatureSeries::new();
        series.commit(&slice(5, 1.0));
        series.commit(&slice(4, 2.0));

        assert_eq!(series.slice_count(), 2);
        assert_eq!(series.total_frames(), 9);
        assert_eq!(series.frame_counts(), &[5, 4]);
        assert_eq!(series.series(Feature::SiGain), &[1.0, 2.0]);
        assert_eq!(series.series(Feature::HvLoss), &[-2.0, -4.0]);
        assert_eq!(series.series(Feature::ChromaSpread).len(), 9);
        assert_eq!(series.series(Feature::ChromaSpread)[5], 2.0);
        for f in Feature::ALL.into_iter().filter(|f| !f.is_per_frame()) {
            assert_eq!(series.series(f).len(), series.slice_count());
        }
    }

    #[test]
    fn reset_clears_everything() {
        let mut series = FeatureSeries::new();
        series.commit(&slice(3, 1.0));
        series.reset();
        assert!(series.is_empty());
        assert!(Feature::ALL.iter().all(|&f| series.series(f).is_empty()));
    }

    #[test]
    fn slice_values_by_feature() {
        let s = slice(2, 0.5);
        assert_eq!(s.values(Feature::ChromaExtreme), &[-0.5, -0.5]);
        assert_eq!(s.values(Feature::CtAtiGain), &[1.5]);
    }
}
