// src/spatial.rs
//
// Edge filtering of luma planes into SI, HV and HVBAR planes.

use crate::error::{Result, VqmError};
use crate::plane::Plane;
use rayon::prelude::*;
use std::f64::consts::FRAC_PI_2;

pub const DEFAULT_FILTER_SIZE: usize = 13;

/// SI magnitudes below this are treated as having no edge at all.
const RMIN: f64 = 20.0;
/// Angular tolerance (radians) around horizontal/vertical for the HV plane.
const DELTA_THETA: f64 = 0.225;

/// Derived planes of one luma frame, all the size of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialPlanes {
    pub si: Plane,
    pub hv_bar: Plane,
    pub hv: Plane,
}

/// Produces SI/HV/HVBAR planes from a luma plane.
pub trait SpatialFilter: Send + Sync {
    fn filter(&self, luma: &Plane) -> SpatialPlanes;
}

/// Separable bandpass edge filter: derivative of a Gaussian across the edge
/// direction, a Gaussian along it.
#[derive(Debug, Clone)]
pub struct Si13Filter {
    derivative: Vec<f64>,
    smoothing: Vec<f64>,
}

impl Si13Filter {
    pub fn new(size: usize) -> Result<Self> {
        if size < 3 || size % 2 == 0 {
            return Err(VqmError::Input(format!(
                "Spatial filter size must be odd and at least 3, got {}",
                size
            )));
        }
        Ok(Self::build(size))
    }

    fn build(size: usize) -> Self {
        let half = (size / 2) as i64;
        let c = size as f64 / 6.5;

        let smoothing: Vec<f64> = (-half..=half)
            .map(|i| (-0.5 * (i as f64 / c).powi(2)).exp())
            .collect();
        let smoothing_sum: f64 = smoothing.iter().sum();
        let smoothing = smoothing.iter().map(|g| g / smoothing_sum).collect();

        let derivative: Vec<f64> = (-half..=half)
            .map(|j| {
                let u = j as f64 / c;
                u * (-0.5 * u * u).exp()
            })
            .collect();
        // unit response to a unit step edge
        let lobe: f64 = derivative.iter().filter(|&&d| d > 0.0).sum();
        let derivative = derivative.iter().map(|d| d / lobe).collect();

        Self {
            derivative,
            smoothing,
        }
    }

    pub fn size(&self) -> usize {
        self.derivative.len()
    }
}

impl Default for Si13Filter {
    fn default() -> Self {
        Self::build(DEFAULT_FILTER_SIZE)
    }
}

impl SpatialFilter for Si13Filter {
    fn filter(&self, luma: &Plane) -> SpatialPlanes {
        let (w, h) = (luma.width(), luma.height());
        let src: Vec<f64> = luma.data().iter().map(|&v| f64::from(v)).collect();

        let horizontal = convolve_cols(
            &convolve_rows(&src, w, h, &self.derivative),
            w,
            h,
            &self.smoothing,
        );
        let vertical = convolve_rows(
            &convolve_cols(&src, w, h, &self.derivative),
            w,
            h,
            &self.smoothing,
        );

        let mut si = Vec::with_capacity(w * h);
        let mut hv = Vec::with_capacity(w * h);
        let mut hv_bar = Vec::with_capacity(w * h);
        for (&gh, &gv) in horizontal.iter().zip(&vertical) {
            let magnitude = (gh * gh + gv * gv).sqrt();
            si.push(magnitude as f32);
            if magnitude < RMIN {
                hv.push(0.0);
                hv_bar.push(0.0);
            } else if is_axis_aligned(gv.atan2(gh)) {
                hv.push(magnitude as f32);
                hv_bar.push(0.0);
            } else {
                hv.push(0.0);
                hv_bar.push(magnitude as f32);
            }
        }

        SpatialPlanes {
            si: Plane::from_raw(w, h, si),
            hv_bar: Plane::from_raw(w, h, hv_bar),
            hv: Plane::from_raw(w, h, hv),
        }
    }
}

fn is_axis_aligned(theta: f64) -> bool {
    let r = theta.rem_euclid(FRAC_PI_2);
    r < DELTA_THETA || FRAC_PI_2 - r < DELTA_THETA
}

/// Mirror index into `0..n` without repeating the edge sample.
fn reflect(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m < n as isize { m as usize } else { (period - m) as usize }
}

fn convolve_rows(src: &[f64], w: usize, h: usize, kernel: &[f64]) -> Vec<f64> {
    let half = (kernel.len() / 2) as isize;
    let mut out = vec![0.0; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let src_row = &src[y * w..(y + 1) * w];
        for (x, o) in row.iter_mut().enumerate() {
            *o = kernel
                .iter()
                .enumerate()
                .map(|(k, c)| c * src_row[reflect(x as isize + k as isize - half, w)])
                .sum();
        }
    });
    out
}

fn convolve_cols(src: &[f64], w: usize, h: usize, kernel: &[f64]) -> Vec<f64> {
    let half = (kernel.len() / 2) as isize;
    let mut out = vec![0.0; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, o) in row.iter_mut().enumerate() {
            *o = kernel
                .iter()
                .enumerate()
                .map(|(k, c)| c * src[reflect(y as isize + k as isize - half, h) * w + x])
                .sum();
        }
    });
    out
}
