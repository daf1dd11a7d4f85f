// src/plot.rs

use crate::metrics::AnalysisResult;
use log::{error, info};
use plotters::prelude::*;
use plotters::style::full_palette::{GREEN, ORANGE};
use quantiles::ckms::CKMS;
use std::path::Path;
use vqm::{Feature, Result, VqmError};

/// Percentile markers drawn over every series.
struct SeriesStats {
    mean: f64,
    p10: f64,
    p50: f64,
    p90: f64,
    min: f64,
    max: f64,
}

impl SeriesStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mut ckms = CKMS::<f64>::new(0.001);
        for v in &sorted {
            ckms.insert(*v);
        }
        // CKMS answers with a rank; read the value back from the sorted copy
        let at = |q: f64| {
            ckms.query(q)
                .map(|(rank, _)| sorted[rank.min(sorted.len() - 1)])
                .unwrap_or(f64::NAN)
        };

        Some(Self {
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p10: at(0.10),
            p50: at(0.50),
            p90: at(0.90),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }

    /// Y range with a little headroom; flat series get a unit-wide band.
    fn y_range(&self) -> (f64, f64) {
        let span = self.max - self.min;
        if span <= f64::EPSILON {
            (self.min - 0.5, self.max + 0.5)
        } else {
            (self.min - 0.05 * span, self.max + 0.05 * span)
        }
    }
}

/// Plots one feature's time series with mean and percentile lines.
pub fn generate_plot(result: &AnalysisResult, feature: Feature, output_path: &Path) -> Result<()> {
    info!("Generating {} plot: {}", feature, output_path.display());

    let values = result.series.series(feature);
    let positions = result.sample_positions(feature);
    let points: Vec<(usize, f64)> = positions
        .into_iter()
        .zip(values.iter().copied())
        .filter(|(_, v)| v.is_finite())
        .collect();
    let finite: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

    let stats = SeriesStats::from_values(&finite).ok_or_else(|| {
        error!("No finite {} values to plot for {}", feature, output_path.display());
        VqmError::Plot(format!("No finite {} values to plot", feature))
    })?;

    let (y_min, y_max) = stats.y_range();
    let x_min = points.first().map_or(0, |(i, _)| *i);
    // a single sample still needs a non-empty x range
    let x_max = points.last().map_or(1, |(i, _)| *i).max(x_min + 1);
    let unit = if feature.is_per_frame() { "Frame" } else { "Slice" };

    let root = BitMapBackend::new(output_path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| VqmError::Plot(format!("Failed to fill plot background: {}", e)))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("{} ({} {}s)", feature, points.len(), unit),
            ("sans-serif", 24).into_font(),
        )
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(|e| VqmError::Plot(format!("Failed to build chart: {}", e)))?;

    let y_label_format = |y: &f64| format!("{:.3}", y);
    chart
        .configure_mesh()
        .x_desc(format!("{} Number", unit))
        .y_desc(feature.to_string())
        .y_label_formatter(&y_label_format)
        .y_labels(8)
        .axis_desc_style(("sans-serif", 16))
        .label_style(("sans-serif", 14))
        .draw()
        .map_err(|e| VqmError::Plot(format!("Failed to draw mesh: {:?}", e)))?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), BLUE.mix(0.8).stroke_width(1)))
        .map_err(|e| VqmError::Plot(format!("Failed to draw main series: {:?}", e)))?
        .label(feature.to_string())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.filled()));

    let lines = [
        (format!("Mean: {:.4}", stats.mean), stats.mean, BLACK),
        (format!("10%:  {:.4}", stats.p10), stats.p10, RED),
        (format!("50%:  {:.4}", stats.p50), stats.p50, ORANGE),
        (format!("90%:  {:.4}", stats.p90), stats.p90, GREEN),
    ];
    for (label, y, color) in lines {
        chart
            .draw_series(LineSeries::new(vec![(x_min, y), (x_max, y)], stat_line_style(color)))
            .map_err(|e| VqmError::Plot(format!("Failed to draw {} line: {:?}", label, e)))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], stat_line_style(color)));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerMiddle)
        .margin(10)
        .label_font(("sans-serif", 12))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| VqmError::Plot(format!("Failed to draw legend: {:?}", e)))?;

    root.present()
        .map_err(|e| VqmError::Plot(format!("Failed to save plot: {:?}", e)))?;
    info!("Successfully generated {} plot: {}", feature, output_path.display());
    Ok(())
}

fn stat_line_style(color: RGBColor) -> ShapeStyle {
    ShapeStyle {
        color: color.to_rgba(),
        filled: false,
        stroke_width: 1,
    }
}
