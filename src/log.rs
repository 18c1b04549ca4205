use crate::batch::BatchReport;
use crate::input::PipelineConfig;
use env_logger::Env;
use std::time::Duration;

/// Initializes `env_logger`.
///
/// `--verbose` forces debug, `--quiet` forces error, otherwise `RUST_LOG` or `info`.
pub fn init_logging(verbose: bool, quiet: bool) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(::log::LevelFilter::Debug);
    } else if quiet {
        builder.filter_level(::log::LevelFilter::Error);
    }
    builder.format_timestamp_secs();
    // a second initialization (tests) is harmless
    let _ = builder.try_init();
}

pub fn show_greeting(title: &str) {
    println!("=== TDD Hotspots: {} ===", title);
}

pub fn config_echo(config: &PipelineConfig) {
    println!("\nConfiguration:");
    println!("  Variable: {}", config.variable);
    println!("  Fail fast: {}", config.fail_fast);
    if let Some(inspect) = &config.inspect {
        println!("  Inspect: {}", inspect.input.display());
    }
    if let Some(clip) = &config.clip {
        println!(
            "  Clip: {} -> {} (boundary {})",
            clip.input_dir.display(),
            clip.output_dir.display(),
            clip.boundary.display()
        );
    }
    if let (Some(dd), Some(input)) = (&config.degree_days, config.degree_days_input()) {
        println!(
            "  Degree days: {} -> {}",
            input.display(),
            dd.output_dir.display()
        );
    }
    if let (Some(hs), Some(input)) = (&config.hotspots, config.hotspots_input()) {
        println!(
            "  Hotspots: {} -> {} (p{})",
            input.display(),
            hs.output_dir.display(),
            hs.percentile
        );
    }
}

pub fn show_report(report: &BatchReport) {
    println!(
        "\n[{}] {} file(s): {} ok, {} failed, {} skipped in {:.2}s",
        report.stage,
        report.total(),
        report.processed.len(),
        report.failures.len(),
        report.skipped,
        report.elapsed_secs
    );
    for outcome in &report.processed {
        if let Some(output) = &outcome.output {
            println!("  {} -> {}", outcome.input.display(), output.display());
        }
    }
    for outcome in report.notes() {
        if let Some(note) = &outcome.note {
            println!("  note: {}: {}", outcome.input.display(), note);
        }
    }
    for failure in &report.failures {
        println!("  FAILED {}: {}", failure.file.display(), failure.reason);
    }
}

pub fn show_farewell_with_timing(elapsed: Duration, success: bool) {
    if success {
        println!("\n=== Completed successfully in {:.2}s ===", elapsed.as_secs_f64());
    } else {
        println!("\n=== Completed with failures in {:.2}s ===", elapsed.as_secs_f64());
    }
}
