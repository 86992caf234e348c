//! perfmetric CLI
//!
//! A thin wrapper around the perfmetric engine and metric-file processing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use perfmetric_cli::{EventCatalog, FixupTable, MetricOptions};

#[derive(Parser)]
#[command(name = "perfmetric")]
#[command(about = "Canonicalize and cross-reference performance metric formulas")]
#[command(after_help = "\
EXAMPLES:
    # Print the canonical form of a formula
    perfmetric canonicalize 'INST_RETIRED.ANY / CPU_CLK_UNHALTED.THREAD + 0'

    # Canonicalize a metric file, flagging events missing from the catalog
    perfmetric metrics skx-metrics.json --catalog skx-events.json

    # Express metrics in terms of each other and write the result
    perfmetric metrics skx-metrics.json --fixups skx-fixups.json --rewrite -o out.json
")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, simplify and print formulas, one per line
    Canonicalize {
        #[arg(required = true)]
        formulas: Vec<String>,
    },
    /// Canonicalize every `MetricExpr` and `MetricThreshold` in a JSON metric file
    Metrics {
        /// JSON array of metric objects
        input: PathBuf,

        /// Fixup table applied to formula text before parsing
        #[arg(long)]
        fixups: Option<PathBuf>,

        /// Event catalog (JSON array of objects with `EventName`)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Rewrite metrics in terms of other metrics
        #[arg(long)]
        rewrite: bool,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Canonicalize { formulas } => {
            let mut failed = 0;
            for formula in &formulas {
                match perfmetric::canonicalize(formula) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        log::error!("{e}");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} formulas failed to parse", formulas.len());
            }
        }
        Command::Metrics {
            input,
            fixups,
            catalog,
            rewrite,
            output,
        } => {
            let fixups = match fixups {
                Some(path) => FixupTable::load(&path)?,
                None => FixupTable::default(),
            };
            let catalog = catalog.map(|path| EventCatalog::load(&path)).transpose()?;
            if let Some(catalog) = &catalog {
                log::info!("Loaded {} catalog events", catalog.len());
            }
            let options = MetricOptions {
                fixups,
                catalog,
                rewrite,
            };

            let report = perfmetric_cli::process_metric_file(&input, &options)?;
            log::info!(
                "{} metrics written, {} skipped, {} thresholds left as written, {} rewritten, {} unknown event references",
                report.metrics.len(),
                report.skipped.len(),
                report.bad_thresholds.len(),
                report.rewritten.len(),
                report.unknown_events.len()
            );

            let json = serde_json::to_string_pretty(&report.metrics)?;
            match output {
                Some(path) => std::fs::write(&path, json + "\n")?,
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}
