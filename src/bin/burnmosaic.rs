//! Yearly burned-area mosaic from a JSON processing configuration.
//!
//! No signal handler is installed, so Ctrl-C ends the process at once.
//! Batch-level cancellation is only reachable through the library's
//! [`Cancellation`].

use anyhow::{Context, Result};
use clap::Parser;

use burnmosaic::{run_year, Cancellation, ProcessingConfig};

#[derive(Parser, Debug)]
#[command(name = "burnmosaic")]
#[command(about = "Map burned area for a study year from fire events and Sentinel-2 scenes")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: String,

    /// Study years to process (default: the configured year)
    #[arg(short, long, num_args = 1..)]
    year: Vec<i32>,

    /// Override the output path template
    #[arg(short, long)]
    output: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    let mut base = ProcessingConfig::from_json_file(&args.config)
        .with_context(|| format!("failed to load configuration {}", args.config))?;
    if let Some(output) = args.output {
        base.paths.output = Some(output);
    }

    let years = if args.year.is_empty() {
        vec![base.study_year]
    } else {
        args.year.clone()
    };

    for year in years {
        let config = base.for_year(year);
        let output = run_year(&config, Cancellation::new())
            .with_context(|| format!("burned area run for {} failed", year))?;

        let summary = &output.summary;
        println!(
            "{}: {} events attempted, {} merged, {} skipped",
            year,
            summary.attempted,
            summary.merged,
            summary.skipped.len()
        );
        for (kind, count) in summary.skipped_by_kind() {
            println!("  {:<20} {}", kind, count);
        }
        match (&output.mosaic, config.output_path()) {
            (Some(mosaic), Ok(path)) => println!(
                "  {} burned pixels -> {}",
                mosaic.burned_pixels(),
                path.display()
            ),
            _ => println!("  no burned area to export"),
        }
    }
    Ok(())
}
