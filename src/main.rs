use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tdd_hotspots::batch::{BatchOptions, BatchReport};
use tdd_hotspots::cli::{
    Cli, Commands, ConfigFormat, OutputFormat, TemplateType, load_config, resolve_clip,
    resolve_degree_days, resolve_hotspots, resolve_inspect, resolve_variable,
};
use tdd_hotspots::degree_days::DegreeDayOptions;
use tdd_hotspots::hotspot::DEFAULT_PERCENTILE;
use tdd_hotspots::info::{
    print_file_info_csv, print_file_info_human, print_file_info_json, print_file_info_yaml,
};
use tdd_hotspots::input::PipelineConfig;
use tdd_hotspots::log::{
    config_echo, init_logging, show_farewell_with_timing, show_greeting, show_report,
};
use tdd_hotspots::{info, run_clip, run_degree_days, run_hotspots, run_pipeline};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Dispatches the subcommand; `Ok(false)` means some files failed.
fn run(cli: Cli) -> Result<bool> {
    let start_time = Instant::now();
    let human = cli.output_format == OutputFormat::Human && !cli.quiet;

    let config = load_config(cli.config.as_ref()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        )
    })?;
    let batch = |fail_fast: bool| BatchOptions {
        fail_fast: fail_fast || config.fail_fast,
        show_progress: !cli.quiet,
    };

    let reports: Vec<BatchReport> = match cli.command {
        Commands::Inspect { path, variable } => {
            let path = resolve_inspect(path, &config)?;
            let variable = resolve_variable(variable, &config);
            let (infos, report) = info::inspect_path(&path, &variable, &batch(false))
                .with_context(|| format!("Failed to inspect {}", path.display()))?;

            match cli.output_format {
                OutputFormat::Human => {
                    println!("Found {} NetCDF file(s)\n", report.total());
                    for info in &infos {
                        print_file_info_human(info);
                    }
                    println!("\nInspection complete.");
                }
                OutputFormat::Json => print_file_info_json(&infos)?,
                OutputFormat::Yaml => print_file_info_yaml(&infos)?,
                OutputFormat::Csv => print_file_info_csv(&infos),
            }
            for failure in &report.failures {
                eprintln!("FAILED {}: {}", failure.file.display(), failure.reason);
            }
            return Ok(report.is_success());
        }

        Commands::Clip {
            input_dir,
            boundary,
            output_dir,
            variable,
            fail_fast,
        } => {
            let clip = resolve_clip(input_dir, boundary, output_dir, &config)?;
            let variable = resolve_variable(variable, &config);
            if human {
                show_greeting("clip and convert");
            }
            vec![run_clip(&clip, &variable, &batch(fail_fast)).context("Clip stage failed")?]
        }

        Commands::DegreeDays {
            input_dir,
            output_dir,
            variable,
            spacing_tolerance,
            fail_fast,
        } => {
            let (input, output) = resolve_degree_days(input_dir, output_dir, &config)?;
            let defaults = DegreeDayOptions::default();
            let options = DegreeDayOptions {
                variable: resolve_variable(variable, &config),
                spacing_tolerance: spacing_tolerance
                    .or(config.degree_days.as_ref().map(|d| d.spacing_tolerance))
                    .unwrap_or(defaults.spacing_tolerance),
            };
            if human {
                show_greeting("thawing degree days");
            }
            vec![
                run_degree_days(&input, &output, &options, &batch(fail_fast))
                    .context("Degree-day stage failed")?,
            ]
        }

        Commands::Hotspots {
            input_dir,
            output_dir,
            percentile,
            fail_fast,
        } => {
            let (input, output) = resolve_hotspots(input_dir, output_dir, &config)?;
            let percentile = percentile
                .or(config.hotspots.as_ref().map(|h| h.percentile))
                .unwrap_or(DEFAULT_PERCENTILE);
            if human {
                show_greeting("percentile hotspots");
            }
            vec![
                run_hotspots(&input, &output, percentile, &batch(fail_fast))
                    .context("Hotspot stage failed")?,
            ]
        }

        Commands::Run { fail_fast } => {
            if cli.config.is_none() {
                bail!("The run command needs a configuration file (--config or TDD_HOTSPOTS_CONFIG)");
            }
            if human {
                show_greeting("pipeline");
                config_echo(&config);
            }
            run_pipeline(&config, &batch(fail_fast)).context("Pipeline failed")?
        }

        Commands::Validate {
            config_file,
            detailed,
        } => {
            let path = config_file
                .or(cli.config.clone())
                .context("No configuration file given")?;
            let config = PipelineConfig::from_file(&path)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid configuration in {}", path.display()))?;
            if !cli.quiet {
                println!("Configuration {} is valid", path.display());
                if detailed {
                    config_echo(&config);
                }
            }
            return Ok(true);
        }

        Commands::Template {
            template_type,
            output,
            format,
        } => {
            let template = match template_type {
                TemplateType::Basic => PipelineConfig::basic_template(),
                TemplateType::Full => PipelineConfig::full_template(),
            };
            let text = match format {
                ConfigFormat::Json => template.to_json()?,
                ConfigFormat::Yaml => template.to_yaml()?,
            };
            write_or_print(output.as_deref(), &text)?;
            return Ok(true);
        }

        Commands::Completions { shell, output } => {
            let mut command = Cli::command();
            let mut buffer = Vec::new();
            clap_complete::generate(shell, &mut command, "tdd-hotspots", &mut buffer);
            write_or_print(output.as_deref(), &String::from_utf8_lossy(&buffer))?;
            return Ok(true);
        }
    };

    let success = reports.iter().all(|r| r.is_success());
    match cli.output_format {
        OutputFormat::Human => {
            if !cli.quiet {
                for report in &reports {
                    show_report(report);
                }
                show_farewell_with_timing(start_time.elapsed(), success);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&reports)?),
        OutputFormat::Csv => print!("{}", tdd_hotspots::batch::reports_csv(&reports)),
    }
    Ok(success)
}

fn write_or_print(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}
