//! Run command: repeated scans until Ctrl-C

use anyhow::Result;
use chrono::Utc;
use signal_gate::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::scan::scan_once;
use super::{build_scanner, open_store};

pub fn run(config: Config, every: Option<u64>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run_async(config, every))
}

async fn run_async(config: Config, every: Option<u64>) -> Result<()> {
    let interval_secs = every.unwrap_or(config.scheduler.scan_interval_secs).max(1);
    let store = open_store(&config)?;
    let scanner = build_scanner(config, store.clone());
    info!("✅ Scanner ready, scanning every {}s", interval_secs);

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Ctrl+C received - initiating graceful shutdown");
                shutdown_clone.notify_one();
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    });

    let mut tick_interval = interval(Duration::from_secs(interval_secs));
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                // scans are CPU-bound; keep them off the async workers
                let result = tokio::task::block_in_place(|| scan_once(&scanner, &store, Utc::now()));
                if let Err(e) = result {
                    error!("Error in scan cycle: {:#}", e);
                }
            }
            _ = shutdown.notified() => {
                info!("✅ Shutdown complete");
                break;
            }
        }
    }

    Ok(())
}
