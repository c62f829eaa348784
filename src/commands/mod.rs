//! Subcommand implementations

pub mod evaluate;
pub mod outcome;
pub mod run;
pub mod scan;

use anyhow::{Context, Result};
use signal_gate::data::CsvBarSource;
use signal_gate::scanner::{LogSink, Scanner};
use signal_gate::store::SqliteStore;
use signal_gate::Config;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// File (if given) + environment overrides, validated
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => {
            let mut config = Config::default();
            config.apply_env_overrides()?;
            config.validate().context("Invalid configuration")?;
            info!("Using default configuration");
            config
        }
    };
    Ok(config)
}

pub fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    SqliteStore::open(&config.scheduler.state_dir).map(Arc::new)
}

/// CSV bars from the data directory, SQLite cooldowns, log + audit sinks
pub fn build_scanner(config: Config, store: Arc<SqliteStore>) -> Scanner<Arc<SqliteStore>> {
    let source = CsvBarSource::new(&config.scheduler.data_dir);
    Scanner::new(config, Box::new(source), store.clone())
        .with_sink(Box::new(LogSink))
        .with_sink(Box::new(store))
}
