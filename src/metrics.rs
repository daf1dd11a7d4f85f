// src/metrics.rs

use crate::cli::CliArgs;
use crate::ffmpeg::{FrameReader, FrameSource, VideoInfo};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use vqm::{Feature, FeatureSeries, FeatureValues, FrameSlice, Result, SliceFeatures, Vqm, VqmError};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SliceRecord {
    #[serde(rename = "sliceNum")]
    pub slice_num: usize,
    /// Index of the slice's first frame within the whole video.
    pub first_frame: usize,
    pub features: SliceFeatures,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AnalysisResult {
    pub reference: PathBuf,
    pub processed: PathBuf,
    pub width: usize,
    pub height: usize,
    pub slice_frames: usize,
    pub slices: Vec<SliceRecord>,
    pub series: FeatureSeries,
    pub pooled: FeatureValues,
    pub vqm: f64,
}

impl AnalysisResult {
    /// Frame or slice index of every sample in `feature`'s series.
    pub fn sample_positions(&self, feature: Feature) -> Vec<usize> {
        if feature.is_per_frame() {
            (0..self.series.series(feature).len()).collect()
        } else {
            self.slices.iter().map(|s| s.slice_num).collect()
        }
    }
}

/// Decodes both videos slice by slice, feeds the pipeline and saves the JSON result.
pub fn run_vqm(
    ref_info: &VideoInfo,
    dist_info: &VideoInfo,
    args: &CliArgs,
    mut vqm: Vqm,
    output_prefix: &Path,
) -> Result<AnalysisResult> {
    info!("Starting VQM analysis...");
    let json_path = output_prefix.with_extension("json");
    let target = common_size(ref_info, dist_info)?;
    let slice_frames = args.frames_per_slice(ref_info.fps);
    info!(
        "Analysing at {}x{} in slices of {} frames",
        target.0, target.1, slice_frames
    );

    let mut reference = FrameReader::open(ref_info, target, args.denoise)?;
    let mut processed = FrameReader::open(dist_info, target, false)?;
    let slices = match read_slices(&mut reference, &mut processed, slice_frames, &mut vqm) {
        Ok(slices) => slices,
        Err(e) => {
            // a crashed decoder explains a short or truncated stream
            if let Some(failure) = reference.failure().or_else(|| processed.failure()) {
                return Err(failure);
            }
            return Err(e);
        }
    };
    reference.finish()?;
    processed.finish()?;

    if slices.is_empty() {
        return Err(VqmError::Input(
            "Videos are too short: at least 2 frames are needed".to_string(),
        ));
    }

    let pooled = vqm.time_collapse()?;
    let score = vqm.metric_value()?;
    let result = AnalysisResult {
        reference: ref_info.path.clone(),
        processed: dist_info.path.clone(),
        width: target.0 as usize,
        height: target.1 as usize,
        slice_frames,
        slices,
        series: vqm.series().clone(),
        pooled,
        vqm: score,
    };

    let content = serde_json::to_string_pretty(&result)?;
    fs::write(&json_path, content)?;
    info!(
        "VQM analysis complete: {} slices, score {:.4}. Output: {}",
        result.slices.len(),
        result.vqm,
        json_path.display()
    );
    Ok(result)
}

/// Reads both streams in lockstep, `slice_frames` at a time, and computes every slice.
///
/// A shorter trailing slice is kept when it has at least 2 frames; a single
/// leftover frame is skipped.
fn read_slices(
    reference: &mut impl FrameSource,
    processed: &mut impl FrameSource,
    slice_frames: usize,
    vqm: &mut Vqm,
) -> Result<Vec<SliceRecord>> {
    let mut slices = Vec::new();
    let mut first_frame = 0;
    loop {
        let ref_frames = reference.read_frames(slice_frames)?;
        let dist_frames = processed.read_frames(slice_frames)?;
        if ref_frames.len() != dist_frames.len() {
            return Err(VqmError::Input(format!(
                "Streams ended out of step: {} reference vs {} processed frames in slice {}",
                ref_frames.len(),
                dist_frames.len(),
                slices.len()
            )));
        }
        if ref_frames.len() < 2 {
            if !ref_frames.is_empty() {
                warn!("Skipping trailing slice of {} frame", ref_frames.len());
            }
            break;
        }

        let slice = FrameSlice::new(ref_frames, dist_frames)?;
        let features = vqm.compute(&slice)?;
        debug!("Slice {} (frame {}): {:?}", slices.len(), first_frame, features);
        slices.push(SliceRecord {
            slice_num: slices.len(),
            first_frame,
            features,
        });
        first_frame += slice.n_frames();
        if slice.n_frames() < slice_frames {
            break;
        }
    }
    Ok(slices)
}

/// Shared 8-aligned analysis size of both streams.
fn common_size(ref_info: &VideoInfo, dist_info: &VideoInfo) -> Result<(u32, u32)> {
    if (ref_info.width, ref_info.height) != (dist_info.width, dist_info.height) {
        return Err(VqmError::Input(format!(
            "Resolution mismatch! Reference: {}x{}, Processed: {}x{}",
            ref_info.width, ref_info.height, dist_info.width, dist_info.height
        )));
    }
    let (w, h) = ref_info.aligned_size();
    if w == 0 || h == 0 {
        return Err(VqmError::Input(format!(
            "Frames of {}x{} are smaller than one 8x8 block",
            ref_info.width, ref_info.height
        )));
    }
    if (w, h) != (ref_info.width, ref_info.height) {
        warn!(
            "Frame size {}x{} is not a multiple of 8; analysing the top-left {}x{}",
            ref_info.width, ref_info.height, w, h
        );
    }
    Ok((w, h))
}

/// Checks that a result is internally consistent before it is reported.
pub fn validate_results(result: &AnalysisResult) -> Result<()> {
    info!("Validating analysis results...");
    if result.slices.is_empty() {
        return Err(VqmError::Validation("No slices found in the analysis result.".to_string()));
    }

    let series = &result.series;
    if series.slice_count() != result.slices.len() {
        return Err(VqmError::Validation(format!(
            "Series holds {} slices but {} were recorded",
            series.slice_count(),
            result.slices.len()
        )));
    }
    for feature in Feature::ALL {
        let expected = if feature.is_per_frame() {
            series.total_frames()
        } else {
            series.slice_count()
        };
        let values = series.series(feature);
        if values.len() != expected {
            return Err(VqmError::Validation(format!(
                "{} has {} samples, expected {}",
                feature,
                values.len(),
                expected
            )));
        }
        if let Some(bad) = values.iter().position(|v| !v.is_finite()) {
            return Err(VqmError::Validation(format!(
                "{} sample {} is not finite",
                feature, bad
            )));
        }
        if result.pooled.get(feature).is_none_or(|v| !v.is_finite()) {
            return Err(VqmError::Validation(format!("Pooled {} is missing or not finite", feature)));
        }
    }

    let mut next_frame = 0;
    for record in &result.slices {
        if record.first_frame != next_frame {
            return Err(VqmError::Validation(format!(
                "Slice {} starts at frame {}, expected {}",
                record.slice_num, record.first_frame, next_frame
            )));
        }
        next_frame += record.features.n_frames;
    }

    if !result.vqm.is_finite() || result.vqm < 0.0 {
        return Err(VqmError::Validation(format!("Invalid VQM score: {}", result.vqm)));
    }
    if result.vqm > 1.0 {
        warn!(
            "VQM score {:.4} is above 1; the processed video is heavily impaired.",
            result.vqm
        );
    }

    info!("All validation checks passed.");
    Ok(())
}
