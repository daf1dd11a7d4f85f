// src/edge.rs
//
// SI loss/gain and HV loss/gain over 8x8 blocks spanning the whole slice.

use crate::compare::{gain, log_comp, loss, perc_thresh, ratio_comp};
use crate::error::{Result, VqmError};
use crate::plane::{BlockGrid, Moments};
use crate::pooling::{mean_of_highest, mean_of_lowest};
use crate::spatial::SpatialPlanes;
use rayon::prelude::*;

pub const EDGE_BLOCK: usize = 8;
const SI_LOSS_THRESHOLD: f64 = 12.0;
const SI_GAIN_THRESHOLD: f64 = 8.0;
const HV_THRESHOLD: f64 = 3.0;
/// Share of blocks averaged by the worst-case spatial collapse.
const WORST_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeFeatures {
    pub si_loss: f64,
    pub si_gain: f64,
    pub hv_loss: f64,
    pub hv_gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BlockEdges {
    si_loss: f64,
    si_gain: f64,
    hv_loss: f64,
    hv_gain: f64,
}

/// Temporal averages of one spatial block across every frame of the slice.
#[derive(Debug, Clone, Copy, Default)]
struct BlockAverages {
    si: Moments,
    hv: f64,
    hv_bar: f64,
}

fn block_averages(planes: &[SpatialPlanes], grid: &BlockGrid, index: usize) -> BlockAverages {
    let rect = grid.rect(index);
    let mut acc = BlockAverages::default();
    for p in planes {
        acc.si.add(p.si.block_moments(rect));
        acc.hv += p.hv.block_mean(rect);
        acc.hv_bar += p.hv_bar.block_mean(rect);
    }
    let n = planes.len();
    BlockAverages {
        si: acc.si.averaged(n),
        hv: acc.hv / n as f64,
        hv_bar: acc.hv_bar / n as f64,
    }
}

fn compare_block(r: BlockAverages, p: BlockAverages) -> BlockEdges {
    let (sd_r, sd_p) = (r.si.std_dev(), p.si.std_dev());

    let si_loss = loss(ratio_comp(
        perc_thresh(sd_r, SI_LOSS_THRESHOLD),
        perc_thresh(sd_p, SI_LOSS_THRESHOLD),
    ));
    let si_gain = gain(log_comp(
        perc_thresh(sd_r, SI_GAIN_THRESHOLD),
        perc_thresh(sd_p, SI_GAIN_THRESHOLD),
    ))
    .sqrt();

    let ratio_r = perc_thresh(r.hv_bar, HV_THRESHOLD).ratio(perc_thresh(r.hv, HV_THRESHOLD));
    let ratio_p = perc_thresh(p.hv_bar, HV_THRESHOLD).ratio(perc_thresh(p.hv, HV_THRESHOLD));

    BlockEdges {
        si_loss,
        si_gain,
        hv_loss: loss(ratio_comp(ratio_r, ratio_p)),
        hv_gain: gain(log_comp(ratio_r, ratio_p)),
    }
}

fn check_inputs(reference: &[SpatialPlanes], processed: &[SpatialPlanes], grid: &BlockGrid) -> Result<()> {
    if reference.is_empty() || reference.len() != processed.len() {
        return Err(VqmError::Precondition(format!(
            "Edge comparison needs the same non-zero number of frames, got {} and {}",
            reference.len(),
            processed.len()
        )));
    }
    for p in reference.iter().chain(processed) {
        grid.check_plane(&p.si)?;
        grid.check_plane(&p.hv)?;
        grid.check_plane(&p.hv_bar)?;
    }
    Ok(())
}

/// Compares the derived planes of a slice. Both inputs hold one entry per frame.
pub fn edge_slice(
    reference: &[SpatialPlanes],
    processed: &[SpatialPlanes],
    grid: &BlockGrid,
) -> Result<EdgeFeatures> {
    check_inputs(reference, processed, grid)?;

    let blocks: Vec<BlockEdges> = (0..grid.len())
        .into_par_iter()
        .map(|i| {
            compare_block(
                block_averages(reference, grid, i),
                block_averages(processed, grid, i),
            )
        })
        .collect();

    let mut si_loss: Vec<f64> = blocks.iter().map(|b| b.si_loss).collect();
    let mut hv_loss: Vec<f64> = blocks.iter().map(|b| b.hv_loss).collect();
    let mut hv_gain: Vec<f64> = blocks.iter().map(|b| b.hv_gain).collect();

    // normalised by frames as well as blocks, unlike the other three
    let si_gain_sum: f64 = blocks.iter().map(|b| b.si_gain).sum();
    let si_gain = si_gain_sum / (reference.len() * grid.len()) as f64;

    Ok(EdgeFeatures {
        si_loss: mean_of_lowest(&mut si_loss, WORST_FRACTION),
        si_gain,
        hv_loss: mean_of_lowest(&mut hv_loss, WORST_FRACTION),
        hv_gain: mean_of_highest(&mut hv_gain, WORST_FRACTION),
    })
}
