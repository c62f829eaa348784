//! Signal gate - main entry point
//!
//! This binary provides five subcommands:
//! - evaluate: Score one instrument/interval and print the breakdown
//! - scan: Run one pass over the configured universe
//! - run: Scan repeatedly on a timer until Ctrl-C
//! - outcome: Record the result of an alerted trade
//! - import: Load a legacy cooldown CSV into the state database

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "signal-gate")]
#[command(about = "Risk-gated trade signal scoring over OHLCV bars", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON console logs and JSON command output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a single instrument/interval
    Evaluate {
        /// Instrument, e.g. "BTC-USD"
        #[arg(short, long)]
        instrument: String,

        /// Interval (1m, 5m, 15m, 1h, 4h, 1d)
        #[arg(short = 'n', long, default_value = "1h")]
        interval: String,

        /// Read bars from this CSV instead of the data directory
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Run one scan over the universe
    Scan,

    /// Scan on a fixed schedule until interrupted
    Run {
        /// Seconds between scans (overrides scheduler.scan_interval_secs)
        #[arg(long)]
        every: Option<u64>,
    },

    /// Record WIN/LOSS for the last alert on a key
    Outcome {
        #[arg(short, long)]
        instrument: String,

        #[arg(short = 'n', long)]
        interval: String,

        /// WIN or LOSS
        #[arg(short, long)]
        result: String,
    },

    /// Import a legacy cooldown CSV (asset, interval, timestamp, result)
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn setup_logging(verbose: bool, json: bool, command_name: &str) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true)
    });
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().with_target(true));

    // File layer - same format but without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Evaluate { .. } => "evaluate",
        Commands::Scan => "scan",
        Commands::Run { .. } => "run",
        Commands::Outcome { .. } => "outcome",
        Commands::Import { .. } => "import",
    };

    setup_logging(cli.verbose, cli.json, command_name)?;

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Evaluate {
            instrument,
            interval,
            file,
        } => commands::evaluate::run(config, instrument, interval, file, cli.json),

        Commands::Scan => commands::scan::run(config, cli.json),

        Commands::Run { every } => commands::run::run(config, every),

        Commands::Outcome {
            instrument,
            interval,
            result,
        } => commands::outcome::run(config, instrument, interval, result),

        Commands::Import { file } => commands::outcome::import(config, file),
    }
}
