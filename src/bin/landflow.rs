//! landflow CLI - convert land-use transition projections into a
//! star-schema analytical store.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::AtomicBool;
use tracing_subscriber::EnvFilter;

use landflow::{
    run_conversion, ConvertConfig, ConvertError, LoadMode, LogProgressSink, MemorySink, PgSink,
    RunReport,
};

#[derive(Parser)]
#[command(name = "landflow")]
#[command(version, about = "Convert land-use transition projections into a star-schema analytical store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full conversion pipeline into PostgreSQL
    Convert {
        /// Input document, one file or an ordered list of shards
        input: Vec<PathBuf>,

        /// Path to a YAML config file; CLI flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Target store URL (defaults to DATABASE_URL)
        #[arg(long)]
        database_url: Option<String>,

        /// Fact rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// How fact batches are committed
        #[arg(long, value_enum)]
        load_mode: Option<LoadMode>,

        /// Relative conservation mismatch that still passes
        #[arg(long)]
        tolerance: Option<f64>,

        /// Relative mismatch beyond which a group is excluded
        #[arg(long)]
        hard_threshold: Option<f64>,

        /// Checkpoint file for resumable progress
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Resume after the checkpoint cursor
        #[arg(long)]
        resume: bool,
    },

    /// Parse and validate without loading anything (dry run)
    Check {
        /// Input document, one file or an ordered list of shards
        input: Vec<PathBuf>,

        /// Relative conservation mismatch that still passes
        #[arg(long, default_value_t = 0.01)]
        tolerance: f64,

        /// Relative mismatch beyond which a group is excluded
        #[arg(long, default_value_t = 0.05)]
        hard_threshold: f64,
    },

    /// Build indexes and analytical views on an already-loaded store
    Finalize {
        /// Target store URL (defaults to DATABASE_URL)
        #[arg(long)]
        database_url: Option<String>,
    },
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ConvertError> {
    match cli.command {
        Commands::Convert {
            input,
            config,
            database_url,
            batch_size,
            load_mode,
            tolerance,
            hard_threshold,
            checkpoint,
            resume,
        } => {
            let mut config = match config {
                Some(path) => ConvertConfig::load_from_file(path)?,
                None => ConvertConfig::default(),
            };
            if !input.is_empty() {
                config.input = input;
            }
            if let Some(v) = batch_size {
                config.batch_size = v;
            }
            if let Some(v) = load_mode {
                config.load_mode = v;
            }
            if let Some(v) = tolerance {
                config.tolerance = v;
            }
            if let Some(v) = hard_threshold {
                config.hard_threshold = v;
            }
            if let Some(v) = checkpoint {
                config.checkpoint_path = Some(v);
            }
            if resume {
                config.resume = true;
            }

            let url = resolve_database_url(database_url.or(config.database_url.clone()))?;
            let mut sink = PgSink::connect(&url)?;
            let report =
                run_conversion(&config, &mut sink, &LogProgressSink, &AtomicBool::new(false))?;
            print_report(&report);
            Ok(())
        }

        Commands::Check {
            input,
            tolerance,
            hard_threshold,
        } => {
            let config = ConvertConfig {
                input,
                tolerance,
                hard_threshold,
                load_mode: LoadMode::Row,
                ..Default::default()
            };
            let mut sink = MemorySink::new();
            let report =
                run_conversion(&config, &mut sink, &LogProgressSink, &AtomicBool::new(false))?;
            print_report(&report);
            Ok(())
        }

        Commands::Finalize { database_url } => {
            let url = resolve_database_url(database_url)?;
            let mut sink = PgSink::connect(&url)?;
            use landflow::BatchSink;
            sink.ensure_schema()?;
            sink.finalize()?;
            println!("✓ Indexes and views are in place");
            Ok(())
        }
    }
}

fn resolve_database_url(explicit: Option<String>) -> Result<String, ConvertError> {
    if let Some(url) = explicit {
        return Ok(url);
    }
    std::env::var("DATABASE_URL").map_err(|_| {
        ConvertError::Config(
            "no database URL: pass --database-url or set DATABASE_URL".to_string(),
        )
    })
}

fn print_report(report: &RunReport) {
    let stats = &report.stats;
    println!("Conversion {}", report.outcome);
    println!("  geographies processed: {}", stats.geographies_processed);
    println!("  records skipped:       {}", stats.records_skipped);
    println!(
        "  groups:                {} passed, {} warned, {} failed",
        stats.groups_passed, stats.groups_warned, stats.groups_failed
    );
    println!(
        "  facts:                 {} loaded, {} excluded",
        stats.facts_loaded, stats.facts_excluded
    );
    println!(
        "  batches:               {} committed, {} failed",
        stats.batches_committed, stats.batches_failed
    );
    println!("  success rate:          {:.1}%", stats.success_rate() * 100.0);
    println!("  elapsed:               {:.1}s", stats.elapsed_secs);
    for failed in &report.failed_batches {
        println!(
            "  ✗ failed batch {}..{} ({} rows): {}",
            failed.first_geography, failed.last_geography, failed.fact_rows, failed.error
        );
    }
}
