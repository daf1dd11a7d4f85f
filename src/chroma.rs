// src/chroma.rs
//
// Chroma spread and chroma extreme, one value per frame of a slice.

use crate::compare::euclidean_sq;
use crate::error::Result;
use crate::plane::{BlockGrid, Frame, FrameSlice};
use crate::pooling::{std_dev, tail_excess};
use rayon::prelude::*;

pub const CHROMA_BLOCK: usize = 8;
/// Perceptual up-weighting of the red difference channel.
const CR_WEIGHT: f64 = 1.5;
const EXTREME_LEVEL: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromaFeatures {
    pub spread: f64,
    pub extreme: f64,
}

/// Per-block distance between the reference and processed (Cb, 1.5·Cr) means.
///
/// The grid must tile both frames exactly.
pub fn block_distances(reference: &Frame, processed: &Frame, grid: &BlockGrid) -> Result<Vec<f64>> {
    grid.check_plane(&reference.cb)?;
    grid.check_plane(&processed.cb)?;
    let distances = (0..grid.len())
        .into_par_iter()
        .map(|i| {
            let rect = grid.rect(i);
            let cb_r = reference.cb.block_mean(rect);
            let cr_r = CR_WEIGHT * reference.cr.block_mean(rect);
            let cb_p = processed.cb.block_mean(rect);
            let cr_p = CR_WEIGHT * processed.cr.block_mean(rect);
            euclidean_sq(cb_r, cr_r, cb_p, cr_p).sqrt()
        })
        .collect();
    Ok(distances)
}

pub fn chroma_frame(reference: &Frame, processed: &Frame, grid: &BlockGrid) -> Result<ChromaFeatures> {
    let mut distances = block_distances(reference, processed, grid)?;
    let spread = std_dev(&distances);
    let extreme = tail_excess(&mut distances, EXTREME_LEVEL);
    Ok(ChromaFeatures { spread, extreme })
}

/// Chroma features for every frame of the slice, in frame order.
pub fn chroma_slice(slice: &FrameSlice, grid: &BlockGrid) -> Result<Vec<ChromaFeatures>> {
    slice
        .reference()
        .iter()
        .zip(slice.processed())
        .map(|(r, p)| chroma_frame(r, p, grid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VqmError;
    use crate::plane::Plane;

    fn grid() -> BlockGrid {
        BlockGrid::new(16, 16, CHROMA_BLOCK).unwrap()
    }

    #[test]
    fn identical_frames_have_no_chroma_impairment() {
        let frame = Frame::uniform(16, 16, 90.0, 110.0, 140.0);
        let f = chroma_frame(&frame, &frame, &grid()).unwrap();
        assert_eq!(f, ChromaFeatures { spread: 0.0, extreme: 0.0 });
    }

    #[test]
    fn uniform_shift_has_no_spread() {
        let reference = Frame::uniform(16, 16, 90.0, 110.0, 140.0);
        let processed = Frame::uniform(16, 16, 90.0, 113.0, 140.0);
        let d = block_distances(&reference, &processed, &grid()).unwrap();
        assert_eq!(d, vec![3.0; 4]);
        let f = chroma_frame(&reference, &processed, &grid()).unwrap();
        assert_eq!(f.spread, 0.0);
        assert_eq!(f.extreme, 0.0);
    }

    #[test]
    fn red_channel_is_weighted() {
        let reference = Frame::uniform(16, 16, 0.0, 128.0, 128.0);
        let processed = Frame::uniform(16, 16, 0.0, 128.0, 130.0);
        let d = block_distances(&reference, &processed, &grid()).unwrap();
        assert!(d.iter().all(|&v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn one_shifted_block_spreads() {
        let reference = Frame::uniform(16, 16, 0.0, 128.0, 128.0);
        let mut processed = reference.clone();
        processed.cb = Plane::from_fn(16, 16, |x, y| if x >= 8 && y >= 8 { 132.0 } else { 128.0 });
        // distances [0, 0, 0, 4]: sqrt(16/4 - 1) = sqrt(3)
        let f = chroma_frame(&reference, &processed, &grid()).unwrap();
        assert!((f.spread - 3f64.sqrt()).abs() < 1e-12);
        assert_eq!(f.extreme, 0.0);
    }

    #[test]
    fn one_value_per_frame() {
        let a = Frame::uniform(16, 16, 0.0, 100.0, 100.0);
        let slice = FrameSlice::new(vec![a.clone(); 3], vec![a; 3]).unwrap();
        assert_eq!(chroma_slice(&slice, &grid()).unwrap().len(), 3);
    }

    #[test]
    fn grid_smaller_than_frame_is_rejected() {
        // a 16x16 grid over 32x32 frames would only look at the top-left quarter
        let reference = Frame::uniform(32, 32, 0.0, 128.0, 128.0);
        let mut processed = reference.clone();
        processed.cb = Plane::from_fn(32, 32, |x, y| if x < 16 && y < 16 { 128.0 } else { 200.0 });
        assert!(matches!(
            chroma_frame(&reference, &processed, &grid()),
            Err(VqmError::Precondition(_))
        ));
        let slice = FrameSlice::new(vec![reference.clone(); 2], vec![processed; 2]).unwrap();
        assert!(chroma_slice(&slice, &grid()).is_err());

        let full = BlockGrid::new(32, 32, CHROMA_BLOCK).unwrap();
        let f = chroma_frame(&reference, &slice.processed()[0], &full).unwrap();
        assert!(f.spread > 0.0);
    }
}
