// src/cli.rs

use clap::Parser;
use std::path::PathBuf;
use vqm::spatial::DEFAULT_FILTER_SIZE;
use vqm::SLICE_SECONDS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Original/reference video file
    #[arg(required = true)]
    pub reference: PathBuf,

    /// Processed video file to compare
    #[arg(required = true)]
    pub processed: PathBuf,

    /// Optional prefix for output files (default: derived from processed filename)
    #[arg(required = false)]
    pub output_prefix: Option<String>,

    /// Enable denoising of reference video (hqdn3d filter)
    #[arg(long)]
    pub denoise: bool,

    /// Specify output directory for results (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Enable logging to file (e.g., vqm_YYYYMMDD_HHMMSS.log)
    #[arg(long)]
    pub log: bool,

    /// Write per-slice feature values to <prefix>.features.log
    #[arg(long)]
    pub diagnostics: bool,

    /// Also record running series lengths in the diagnostics file
    #[arg(long, requires = "diagnostics")]
    pub verbose_diagnostics: bool,

    /// Slice duration in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = SLICE_SECONDS)]
    pub slice_seconds: f64,

    /// Frames per slice (overrides --slice-seconds)
    #[arg(long, value_name = "N")]
    pub slice_frames: Option<usize>,

    /// Window size of the SI/HV edge filter
    #[arg(long, value_name = "N", default_value_t = DEFAULT_FILTER_SIZE)]
    pub filter_size: usize,

    /// JSON file with collapse rules and score weights
    #[arg(long, value_name = "FILE")]
    pub policy: Option<PathBuf>,

    /// Override one temporal collapse rule, e.g. hv_loss=mean,square,min:0.06
    #[arg(long = "collapse", value_name = "RULE")]
    pub collapse: Vec<String>,

    /// Skip PNG plot generation
    #[arg(long)]
    pub no_plot: bool,
}

impl CliArgs {
    /// Frames per slice for a stream at `fps`, never fewer than two.
    pub fn frames_per_slice(&self, fps: f64) -> usize {
        self.slice_frames
            .unwrap_or_else(|| (fps * self.slice_seconds).round() as usize)
            .max(2)
    }
}

pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_length_follows_frame_rate() {
        let args = CliArgs::parse_from(["vqm", "ref.mkv", "out.mkv"]);
        assert_eq!(args.frames_per_slice(30.0), 6);
        assert_eq!(args.frames_per_slice(24000.0 / 1001.0), 5);
        assert_eq!(args.frames_per_slice(5.0), 2);
        assert_eq!(args.filter_size, 13);
    }

    #[test]
    fn explicit_slice_frames_win() {
        let args = CliArgs::parse_from(["vqm", "a", "b", "--slice-frames", "12", "--collapse", "si_loss=p5"]);
        assert_eq!(args.frames_per_slice(60.0), 12);
        assert_eq!(args.collapse, vec!["si_loss=p5".to_string()]);
    }
}
