mod cli;
mod ffmpeg;
mod metrics;
mod plot;

use crate::cli::CliArgs;
use chrono::Local;
use log::{error, info, warn, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use vqm::collapse::{PolicyFile, RuleOverride};
use vqm::{
    CollapsePolicy, Feature, LogLevel, PipelineConfig, Result, ScoreModel, Vqm, VqmError,
    DIAGNOSTICS_TARGET,
};

fn main() -> ExitCode {
    let start_time = Instant::now();
    let args = cli::parse_args();

    let output_prefix = match prepare_output_prefix(&args) {
        Ok(prefix) => prefix,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = setup_logging(&args, &output_prefix) {
        eprintln!("Error setting up logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting VQM analysis...");
    info!("Arguments: {:?}", args);

    match run(args, &output_prefix) {
        Ok(()) => {
            let duration = start_time.elapsed();
            info!("Analysis completed successfully in {:.2?}", duration);
            println!("Analysis completed successfully in {:.2?}", duration);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let duration = start_time.elapsed();
            error!("Analysis failed after {:.2?}: {}", duration, e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Creates the output directory and resolves `<dir>/<prefix>`.
fn prepare_output_prefix(args: &CliArgs) -> Result<PathBuf> {
    let output_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    if !output_dir.exists() {
        fs::create_dir_all(&output_dir)?;
    }
    let prefix_str = args.output_prefix.clone().unwrap_or_else(|| {
        args.processed.file_stem().map_or_else(
            || "vqm_analysis".to_string(),
            |stem| stem.to_string_lossy().to_string(),
        )
    });
    Ok(output_dir.join(prefix_str))
}

/// Console and optional run log; the per-slice feature record goes to its own file.
fn setup_logging(args: &CliArgs, output_prefix: &Path) -> std::result::Result<(), fern::InitError> {
    let base_config = fern::Dispatch::new()
        .level(LevelFilter::Info)
        .level_for("vqm", LevelFilter::Debug);

    let mut run_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() != DIAGNOSTICS_TARGET)
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(
            fern::Dispatch::new()
                .level(LevelFilter::Info)
                .chain(std::io::stdout()),
        );

    let mut log_path = None;
    if args.log {
        let log_filename = format!("vqm_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        let path = args
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(log_filename);
        run_log = run_log.chain(fern::log_file(&path)?);
        log_path = Some(path);
    }

    let mut logger = base_config.chain(run_log);

    let features_path = output_prefix.with_extension("features.log");
    if args.diagnostics {
        // the feature record is written bare, one `name: value` per line
        let diagnostics = fern::Dispatch::new()
            .filter(|metadata| metadata.target() == DIAGNOSTICS_TARGET)
            .format(|out, message, _| out.finish(format_args!("{}", message)))
            .chain(fern::log_file(&features_path)?);
        logger = logger.chain(diagnostics);
    }

    logger.apply()?;
    if let Some(path) = log_path {
        info!("Logging to file: {}", path.display());
    }
    if args.diagnostics {
        info!("Writing per-slice features to: {}", features_path.display());
    }
    Ok(())
}

/// Default policy and score model, then the policy file, then `--collapse` overrides.
fn build_policy(args: &CliArgs) -> Result<(CollapsePolicy, ScoreModel)> {
    let mut policy = CollapsePolicy::default();
    let mut model = ScoreModel::default();
    if let Some(path) = &args.policy {
        info!("Loading collapse policy: {}", path.display());
        PolicyFile::load(path)?.apply_to(&mut policy, &mut model);
    }
    for text in &args.collapse {
        let o: RuleOverride = text.parse()?;
        info!("Collapse override for {}: {:?}", o.feature, o.rule);
        policy.set(o.feature, o.rule);
    }
    Ok((policy, model))
}

fn pipeline_config(args: &CliArgs) -> PipelineConfig {
    let log_level = if args.verbose_diagnostics {
        LogLevel::Verbose
    } else if args.diagnostics {
        LogLevel::Normal
    } else {
        LogLevel::Minimal
    };
    PipelineConfig {
        filter_size: args.filter_size,
        log_level,
    }
}

fn run(args: CliArgs, output_prefix: &Path) -> Result<()> {
    info!("Reference: {}", args.reference.display());
    info!("Processed: {}", args.processed.display());

    let ref_info = ffmpeg::get_video_info(&args.reference)?;
    let dist_info = ffmpeg::get_video_info(&args.processed)?;

    if ref_info.frame_count != dist_info.frame_count {
        return Err(VqmError::Input(format!(
            "Frame count mismatch! Reference: {}, Processed: {}",
            ref_info.frame_count, dist_info.frame_count
        )));
    }
    if (ref_info.fps - dist_info.fps).abs() > 0.01 {
        return Err(VqmError::Input(format!(
            "Frame rate mismatch! Reference: {:.3}, Processed: {:.3}",
            ref_info.fps, dist_info.fps
        )));
    }
    if ref_info.is_hdr != dist_info.is_hdr {
        warn!("Only one input is HDR; both are tonemapped to SDR independently.");
    }
    info!("Input validation passed.");
    info!("Using output prefix: {}", output_prefix.display());

    let (policy, model) = build_policy(&args)?;
    let vqm = Vqm::new(pipeline_config(&args))?.with_policy(policy, model);

    let result = metrics::run_vqm(&ref_info, &dist_info, &args, vqm, output_prefix)?;
    metrics::validate_results(&result)?;

    let json_path = output_prefix.with_extension("json");
    println!("Results saved:");
    println!("  JSON: {}", json_path.display());

    if args.no_plot {
        info!("Plot generation disabled.");
    } else {
        for feature in Feature::ALL {
            let plot_path = output_prefix.with_extension(format!("{}.png", feature));
            plot::generate_plot(&result, feature, &plot_path)?;
            println!("  {} Plot: {}", feature, plot_path.display());
        }
    }

    println!("Pooled features:");
    for (feature, value) in result.pooled.iter() {
        println!("  {:<15} {:.6}", feature.name(), value);
    }
    println!("VQM: {:.4}", result.vqm);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use vqm::{CollapseRule, Reduction};

    #[test]
    fn overrides_apply_after_defaults() {
        let args = CliArgs::parse_from(["vqm", "a", "b", "--collapse", "si_loss=p5,max:0"]);
        let (policy, model) = build_policy(&args).unwrap();
        assert_eq!(
            policy.rule(Feature::SiLoss),
            CollapseRule::new(Reduction::Percentile(5.0)).with_max(0.0)
        );
        assert_eq!(policy.rule(Feature::HvGain), CollapseRule::new(Reduction::Mean));
        assert_eq!(model, ScoreModel::default());

        let bad = CliArgs::parse_from(["vqm", "a", "b", "--collapse", "vqm=mean"]);
        assert!(build_policy(&bad).is_err());
    }

    #[test]
    fn diagnostics_flags_pick_log_level() {
        let quiet = CliArgs::parse_from(["vqm", "a", "b"]);
        assert_eq!(pipeline_config(&quiet).log_level, LogLevel::Minimal);
        let verbose = CliArgs::parse_from(["vqm", "a", "b", "--diagnostics", "--verbose-diagnostics"]);
        assert_eq!(pipeline_config(&verbose).log_level, LogLevel::Verbose);
    }

    #[test]
    fn prefix_defaults_to_processed_stem() {
        let args = CliArgs::parse_from(["vqm", "ref.mkv", "dir/encoded.mkv"]);
        assert_eq!(prepare_output_prefix(&args).unwrap(), PathBuf::from("./encoded"));
    }
}
