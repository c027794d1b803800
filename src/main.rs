use anyhow::{Context, Result};
use chokepoint::cli::{Cli, OutputFormat};
use chokepoint::config::SurveyConfig;
use chokepoint::detector::Detector;
use chokepoint::survey::{ProcessSurveyor, SurveyWindow, Surveyor, TimeWindowSurveyor};
use chokepoint::timer::ThreadTimer;
use chokepoint::workload;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Config file (or the one-second preset) with command-line overrides applied
fn load_config(args: &Cli) -> Result<SurveyConfig> {
    let mut config = match &args.config {
        Some(path) => SurveyConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SurveyConfig::fine_grained(),
    };
    if let Some(window_ms) = args.window_ms {
        config.window_size_ms = window_ms;
    }
    if args.allow.is_some() {
        config.allow = args.allow.clone();
    }
    if args.deny.is_some() {
        config.deny = args.deny.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_window(window: &SurveyWindow, format: OutputFormat) {
    let report = window.report();
    match format {
        OutputFormat::Text => println!("{}", report),
        OutputFormat::Json => match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(err) => tracing::warn!("cannot serialize window report: {}", err),
        },
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if args.threads == 0 {
        anyhow::bail!("Invalid value for --threads: 0 (must be >= 1)");
    }

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let detector = Arc::new(Detector::new());
    let format = args.format;

    let process = ProcessSurveyor::from_config(&detector, &config)?;
    let windows = TimeWindowSurveyor::from_config(
        &detector,
        &config,
        Box::new(ThreadTimer::new()),
        move |window| print_window(&window, format),
    )?;

    let summary = workload::run(
        &detector,
        &workload::default_bottlenecks(),
        args.threads,
        Duration::from_millis(args.duration_ms),
    )?;

    // Stop the timer first so the final flush cannot be skipped as a
    // concurrent tick
    windows.dispose();
    windows.rotate();
    process.dispose();

    let totals = process.report();
    match format {
        OutputFormat::Text => {
            println!("{}", totals);
            println!(
                "{} accesses on {} threads",
                summary.accesses, summary.threads
            );
            if let Ok(hottest) = process.most_utilized_bottleneck() {
                println!("most utilized: {}", hottest);
            }
        }
        OutputFormat::Json => println!("{}", totals.to_json()?),
    }

    Ok(())
}
