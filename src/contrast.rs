// src/contrast.rs
//
// Contrast x ATI gain over 4x4 blocks spanning `n_frames - 1` frame pairs.

use crate::compare::{gain, perc_thresh, ratio_comp, Thresholded};
use crate::error::{Result, VqmError};
use crate::plane::{BlockGrid, Frame, Moments, Plane};
use rayon::prelude::*;

pub const CONTRAST_BLOCK: usize = 4;
const THRESHOLD: f64 = 3.0;

/// Absolute temporal information: `|Y[i] - Y[i-1]|` for every consecutive pair.
pub fn ati_planes(frames: &[Frame]) -> Result<Vec<Plane>> {
    if frames.len() < 2 {
        return Err(VqmError::Precondition(format!(
            "ATI needs at least 2 frames, got {}",
            frames.len()
        )));
    }
    frames
        .windows(2)
        .map(|pair| pair[1].y.abs_diff(&pair[0].y))
        .collect()
}

/// `E[X]² - E[X²]`.
///
/// This is the negated variance, the sign the published parameter uses.
/// It is always `<= 0`, so the threshold below pins it at 3.
fn inverted_variance(m: Moments) -> f64 {
    m.mean * m.mean - m.mean_sq
}

fn feature_strength(ati: Moments, contrast: Moments) -> Thresholded {
    perc_thresh(inverted_variance(ati), THRESHOLD)
        .product(perc_thresh(inverted_variance(contrast), THRESHOLD))
}

fn block_strength(ati: &[Plane], frames: &[Frame], grid: &BlockGrid, index: usize) -> Thresholded {
    let rect = grid.rect(index);
    let mut motion = Moments::default();
    let mut contrast = Moments::default();
    // contrast uses the first n-1 luma frames, paired with the n-1 ATI planes
    for (a, f) in ati.iter().zip(frames) {
        motion.add(a.block_moments(rect));
        contrast.add(f.y.block_moments(rect));
    }
    let n = ati.len();
    feature_strength(motion.averaged(n), contrast.averaged(n))
}

fn check_stream(frames: &[Frame], ati: &[Plane], grid: &BlockGrid) -> Result<()> {
    if ati.len() + 1 != frames.len() {
        return Err(VqmError::Precondition(format!(
            "{} frames need {} ATI planes, got {}",
            frames.len(),
            frames.len().saturating_sub(1),
            ati.len()
        )));
    }
    for f in frames {
        grid.check_plane(&f.y)?;
    }
    for a in ati {
        grid.check_plane(a)?;
    }
    Ok(())
}

/// Mean over all blocks of `gain(ratio_comp(reference, processed))`.
///
/// Each stream needs at least two frames and the ATI planes built from them.
pub fn ct_ati_slice(
    reference: &[Frame],
    processed: &[Frame],
    reference_ati: &[Plane],
    processed_ati: &[Plane],
    grid: &BlockGrid,
) -> Result<f64> {
    if reference.len() < 2 || reference.len() != processed.len() {
        return Err(VqmError::Precondition(format!(
            "Contrast x ATI needs the same number of frames (at least 2), got {} and {}",
            reference.len(),
            processed.len()
        )));
    }
    check_stream(reference, reference_ati, grid)?;
    check_stream(processed, processed_ati, grid)?;

    let per_block: Vec<f64> = (0..grid.len())
        .into_par_iter()
        .map(|i| {
            let fsr = block_strength(reference_ati, reference, grid, i);
            let fsp = block_strength(processed_ati, processed, grid, i);
            gain(ratio_comp(fsr, fsp))
        })
        .collect();
    Ok(per_block.iter().sum::<f64>() / grid.len() as f64)
}
