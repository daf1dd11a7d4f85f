// src/pipeline.rs

use crate::chroma::{chroma_slice, CHROMA_BLOCK};
use crate::collapse::{CollapsePolicy, FeatureValues, ScoreModel};
use crate::contrast::{ati_planes, ct_ati_slice, CONTRAST_BLOCK};
use crate::edge::{edge_slice, EDGE_BLOCK};
use crate::error::{Result, VqmError};
use crate::plane::{BlockGrid, Frame, FrameSlice};
use crate::series::{FeatureSeries, SliceFeatures};
use crate::spatial::{Si13Filter, SpatialFilter, SpatialPlanes, DEFAULT_FILTER_SIZE};
use log::{debug, info, log_enabled, Level};
use rayon::prelude::*;

/// Log target for the per-slice feature record.
pub const DIAGNOSTICS_TARGET: &str = "vqm::diagnostics";

/// Nominal slice duration in seconds.
pub const SLICE_SECONDS: f64 = 0.2;

/// Verbosity of the diagnostics record; `Minimal` writes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Minimal,
    #[default]
    Normal,
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub filter_size: usize,
    pub log_level: LogLevel,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter_size: DEFAULT_FILTER_SIZE,
            log_level: LogLevel::default(),
        }
    }
}

/// Feature pipeline holding the time series accumulated over repeated
/// [`Vqm::compute`] calls.
pub struct Vqm<F: SpatialFilter = Si13Filter> {
    config: PipelineConfig,
    filter: F,
    series: FeatureSeries,
    policy: CollapsePolicy,
    model: ScoreModel,
}

impl Vqm<Si13Filter> {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let filter = Si13Filter::new(config.filter_size)?;
        Ok(Self::with_filter(config, filter))
    }
}

impl<F: SpatialFilter> Vqm<F> {
    pub fn with_filter(config: PipelineConfig, filter: F) -> Self {
        Self {
            config,
            filter,
            series: FeatureSeries::new(),
            policy: CollapsePolicy::default(),
            model: ScoreModel::default(),
        }
    }

    pub fn with_policy(mut self, policy: CollapsePolicy, model: ScoreModel) -> Self {
        self.policy = policy;
        self.model = model;
        self
    }

    pub fn series(&self) -> &FeatureSeries {
        &self.series
    }

    /// Drops all accumulated series.
    pub fn reset(&mut self) {
        self.series.reset();
    }

    /// Extracts every feature of one slice and appends them to the series.
    ///
    /// The slice must hold at least two frames and its planes must be a
    /// multiple of 8 in both dimensions. On error nothing is appended.
    pub fn compute(&mut self, slice: &FrameSlice) -> Result<SliceFeatures> {
        let n = slice.n_frames();
        if n < 2 {
            return Err(VqmError::Precondition(format!(
                "Slice has {} frame(s); contrast/ATI features need at least 2",
                n
            )));
        }
        let (w, h) = (slice.width(), slice.height());
        let chroma_grid = BlockGrid::new(w, h, CHROMA_BLOCK)?;
        let edge_grid = BlockGrid::new(w, h, EDGE_BLOCK)?;
        let contrast_grid = BlockGrid::new(w, h, CONTRAST_BLOCK)?;
        debug!("Computing slice of {} frames at {}x{}", n, w, h);

        let reference_ati = ati_planes(slice.reference())?;
        let processed_ati = ati_planes(slice.processed())?;
        let (reference_edges, processed_edges) = rayon::join(
            || self.spatial_planes(slice.reference()),
            || self.spatial_planes(slice.processed()),
        );

        let chroma = chroma_slice(slice, &chroma_grid)?;
        let edges = edge_slice(&reference_edges, &processed_edges, &edge_grid)?;
        let ct_ati_gain = ct_ati_slice(
            slice.reference(),
            slice.processed(),
            &reference_ati,
            &processed_ati,
            &contrast_grid,
        )?;

        let features = SliceFeatures {
            n_frames: n,
            chroma_spread: chroma.iter().map(|c| c.spread).collect(),
            chroma_extreme: chroma.iter().map(|c| c.extreme).collect(),
            si_loss: edges.si_loss,
            si_gain: edges.si_gain,
            hv_loss: edges.hv_loss,
            hv_gain: edges.hv_gain,
            ct_ati_gain,
        };
        self.series.commit(&features);
        self.record(&features);
        Ok(features)
    }

    fn spatial_planes(&self, frames: &[Frame]) -> Vec<SpatialPlanes> {
        frames.par_iter().map(|f| self.filter.filter(&f.y)).collect()
    }

    fn record(&self, features: &SliceFeatures) {
        if self.config.log_level <= LogLevel::Minimal
            || !log_enabled!(target: DIAGNOSTICS_TARGET, Level::Info)
        {
            return;
        }
        for (spread, extreme) in features.chroma_spread.iter().zip(&features.chroma_extreme) {
            info!(target: DIAGNOSTICS_TARGET, "chroma_spread: {}", spread);
            info!(target: DIAGNOSTICS_TARGET, "chroma_extreme: {}", extreme);
        }
        info!(target: DIAGNOSTICS_TARGET, "si_gain: {}", features.si_gain);
        info!(target: DIAGNOSTICS_TARGET, "hv_gain: {}", features.hv_gain);
        info!(target: DIAGNOSTICS_TARGET, "hv_loss: {}", features.hv_loss);
        info!(target: DIAGNOSTICS_TARGET, "si_loss: {}", features.si_loss);
        info!(target: DIAGNOSTICS_TARGET, "ct_ati_gain: {}", features.ct_ati_gain);
        info!(target: DIAGNOSTICS_TARGET, "processed frames: {}", features.n_frames);
        if self.config.log_level >= LogLevel::Verbose {
            info!(
                target: DIAGNOSTICS_TARGET,
                "series length: {} slices, {} frames",
                self.series.slice_count(),
                self.series.total_frames()
            );
        }
    }

    /// Collapses every series over all slices computed so far.
    pub fn time_collapse(&self) -> Result<FeatureValues> {
        self.policy.collapse(&self.series)
    }

    /// Overall quality score from the collapsed features.
    pub fn metric_value(&self) -> Result<f64> {
        let values = self.time_collapse()?;
        Ok(self.model.score(&values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::Plane;
    use crate::series::Feature;

    fn uniform_slice(n: usize, w: usize, h: usize) -> FrameSlice {
        let f = Frame::uniform(w, h, 120.0, 100.0, 140.0);
        FrameSlice::new(vec![f.clone(); n], vec![f; n]).unwrap()
    }

    #[test]
    fn identical_uniform_slice_is_all_zero() {
        let mut vqm = Vqm::new(PipelineConfig::default()).unwrap();
        let f = vqm.compute(&uniform_slice(2, 16, 16)).unwrap();

        assert_eq!(f.n_frames, 2);
        assert_eq!(f.chroma_spread, vec![0.0, 0.0]);
        assert_eq!(f.chroma_extreme, vec![0.0, 0.0]);
        assert_eq!(f.si_loss, 0.0);
        assert_eq!(f.si_gain, 0.0);
        assert_eq!(f.hv_loss, 0.0);
        assert_eq!(f.hv_gain, 0.0);
        assert_eq!(f.ct_ati_gain, 0.0);

        let series = vqm.series();
        assert_eq!(series.slice_count(), 1);
        assert_eq!(series.series(Feature::ChromaSpread).len(), 2);
        assert_eq!(series.series(Feature::HvGain), &[0.0]);
        assert_eq!(series.frame_counts(), &[2]);
    }

    #[test]
    fn single_frame_slices_are_rejected_without_side_effects() {
        let mut vqm = Vqm::new(PipelineConfig::default()).unwrap();
        let err = vqm.compute(&uniform_slice(1, 16, 16)).unwrap_err();
        assert!(matches!(err, VqmError::Precondition(_)));
        assert!(vqm.series().is_empty());
    }

    #[test]
    fn misaligned_planes_are_rejected_without_side_effects() {
        let mut vqm = Vqm::new(PipelineConfig::default()).unwrap();
        vqm.compute(&uniform_slice(2, 16, 16)).unwrap();
        let err = vqm.compute(&uniform_slice(2, 20, 16)).unwrap_err();
        assert!(matches!(err, VqmError::Precondition(_)));
        assert_eq!(vqm.series().slice_count(), 1);
        assert_eq!(vqm.series().series(Feature::ChromaSpread).len(), 2);
    }

    #[test]
    fn even_filter_size_is_a_config_error() {
        let config = PipelineConfig {
            filter_size: 12,
            ..PipelineConfig::default()
        };
        assert!(Vqm::new(config).is_err());
    }

    #[test]
    fn custom_filter_is_used() {
        struct Textured;
        impl SpatialFilter for Textured {
            fn filter(&self, luma: &Plane) -> SpatialPlanes {
                let (w, h) = (luma.width(), luma.height());
                let bright = luma.get(0, 0) > 125.0;
                let tex = Plane::from_fn(w, h, |x, _| if bright && x % 2 == 0 { 200.0 } else { 0.0 });
                SpatialPlanes {
                    si: tex,
                    hv_bar: Plane::filled(w, h, 0.0),
                    hv: Plane::filled(w, h, 0.0),
                }
            }
        }

        let reference = Frame::uniform(16, 16, 130.0, 128.0, 128.0);
        let processed = Frame::uniform(16, 16, 100.0, 128.0, 128.0);
        let slice = FrameSlice::new(vec![reference; 2], vec![processed; 2]).unwrap();
        let mut vqm = Vqm::with_filter(PipelineConfig::default(), Textured);
        let f = vqm.compute(&slice).unwrap();
        // reference block SI std 100 vs floored 12 -> (12 - 100) / 100
        assert!((f.si_loss - (-0.88)).abs() < 1e-12);
        assert_eq!(f.si_gain, 0.0);
    }

    #[test]
    fn collapse_and_score_after_slices() {
        let mut vqm = Vqm::new(PipelineConfig::default()).unwrap();
        assert!(matches!(vqm.metric_value(), Err(VqmError::EmptySeries(_))));

        vqm.compute(&uniform_slice(3, 16, 16)).unwrap();
        vqm.compute(&uniform_slice(2, 16, 16)).unwrap();
        let values = vqm.time_collapse().unwrap();
        // clip floors of the default policy
        assert_eq!(values.get(Feature::ChromaSpread), Some(0.6));
        assert_eq!(values.get(Feature::SiGain), Some(0.004));
        assert_eq!(values.get(Feature::HvLoss), Some(0.06));
        assert_eq!(values.get(Feature::CtAtiGain), Some(0.0));

        let expected = 0.0192 * 0.6 - 2.3416 * 0.004 + 0.5969 * 0.06;
        assert!((vqm.metric_value().unwrap() - expected).abs() < 1e-12);

        vqm.reset();
        assert!(vqm.series().is_empty());
    }
}

#[cfg(test)]
mod diagnostics_tests {
    use super::*;
    use crate::plane::Plane;
    use log::{LevelFilter, Log, Metadata, Record};
    use std::cell::RefCell;

    thread_local! {
        static LINES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    /// Keeps diagnostics lines per test thread.
    struct Capture;

    impl Log for Capture {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if record.target() == DIAGNOSTICS_TARGET {
                LINES.with(|l| l.borrow_mut().push(record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    fn capture() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Debug);
        LINES.with(|l| l.borrow_mut().clear());
    }

    fn captured() -> Vec<String> {
        LINES.with(|l| l.borrow().clone())
    }

    fn textured_slice() -> FrameSlice {
        let reference = Frame::new(
            Plane::from_fn(16, 16, |x, _| if (x / 4) % 2 == 0 { 0.0 } else { 255.0 }),
            Plane::filled(16, 16, 128.0),
            Plane::filled(16, 16, 128.0),
        )
        .unwrap();
        let mut processed = Frame::uniform(16, 16, 128.0, 128.0, 128.0);
        processed.cb = Plane::from_fn(16, 16, |x, y| if x < 8 && y < 8 { 140.0 } else { 128.0 });
        FrameSlice::new(vec![reference; 3], vec![processed; 3]).unwrap()
    }

    fn run(log_level: LogLevel) -> (SliceFeatures, Vec<String>) {
        capture();
        let config = PipelineConfig {
            log_level,
            ..PipelineConfig::default()
        };
        let mut vqm = Vqm::new(config).unwrap();
        let f = vqm.compute(&textured_slice()).unwrap();
        (f, captured())
    }

    #[test]
    fn minimal_writes_nothing() {
        let (_, lines) = run(LogLevel::Minimal);
        assert!(lines.is_empty(), "{:?}", lines);
    }

    #[test]
    fn normal_writes_every_value_in_order() {
        let (f, lines) = run(LogLevel::Normal);
        let mut expected = Vec::new();
        for i in 0..3 {
            expected.push(format!("chroma_spread: {}", f.chroma_spread[i]));
            expected.push(format!("chroma_extreme: {}", f.chroma_extreme[i]));
        }
        expected.push(format!("si_gain: {}", f.si_gain));
        expected.push(format!("hv_gain: {}", f.hv_gain));
        expected.push(format!("hv_loss: {}", f.hv_loss));
        expected.push(format!("si_loss: {}", f.si_loss));
        expected.push(format!("ct_ati_gain: {}", f.ct_ati_gain));
        expected.push("processed frames: 3".to_string());
        assert_eq!(lines, expected);
    }

    #[test]
    fn verbose_adds_series_lengths() {
        let (_, lines) = run(LogLevel::Verbose);
        assert_eq!(lines.len(), 13);
        assert_eq!(lines[11], "processed frames: 3");
        assert_eq!(lines[12], "series length: 1 slices, 3 frames");
    }

    #[test]
    fn log_level_never_changes_the_numbers() {
        let (minimal, _) = run(LogLevel::Minimal);
        let (normal, _) = run(LogLevel::Normal);
        let (verbose, _) = run(LogLevel::Verbose);
        assert_eq!(minimal, normal);
        assert_eq!(normal, verbose);
        assert!(normal.chroma_spread.iter().any(|&v| v > 0.0));
        assert!(normal.si_loss < 0.0);
    }
}
