use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fitbit_ingest::cli::commands;

#[derive(Parser)]
#[command(name = "fitbit-ingest")]
#[command(author, version, about = "Incremental ingestion for Fitbit health metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, env = "FITBIT_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest source data, one day per key at a time
    Ingest {
        /// Run mode (step, catch-up, follow)
        #[arg(short, long, default_value = "step")]
        mode: String,
        /// Restrict to one metric (heart_rate, spo2, hrv, breathing_rate,
        /// active_zone_minutes, activity)
        #[arg(long)]
        metric: Option<String>,
        /// Restrict to one user
        #[arg(long)]
        user: Option<String>,
    },
    /// Show source availability and watermarks per key
    Status {
        /// Restrict to one metric
        #[arg(long)]
        metric: Option<String>,
        /// Restrict to one user
        #[arg(long)]
        user: Option<String>,
    },
    /// Rewind watermarks to the configured start date
    Reset {
        /// Also delete stored metric records
        #[arg(long)]
        wipe_data: bool,
        /// Restrict to one metric
        #[arg(long)]
        metric: Option<String>,
        /// Restrict to one user
        #[arg(long)]
        user: Option<String>,
    },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = match cli.command {
        Commands::Ingest { mode, metric, user } => {
            commands::ingest(
                cli.config.as_deref(),
                &mode,
                metric.as_deref(),
                user.as_deref(),
            )
            .await
        }
        Commands::Status { metric, user } => {
            commands::status(cli.config.as_deref(), metric.as_deref(), user.as_deref()).await
        }
        Commands::Reset {
            wipe_data,
            metric,
            user,
        } => {
            commands::reset(
                cli.config.as_deref(),
                wipe_data,
                metric.as_deref(),
                user.as_deref(),
            )
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
