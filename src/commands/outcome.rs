//! Outcome and import commands

use anyhow::{bail, Result};
use chrono::Utc;
use signal_gate::budget::DailyBudget;
use signal_gate::cooldown::{CooldownBook, CooldownStatus};
use signal_gate::{Config, Instrument, Interval, Outcome};
use std::path::PathBuf;
use tracing::{info, warn};

use super::open_store;

pub fn run(config: Config, instrument: String, interval: String, result: String) -> Result<()> {
    let instrument = Instrument::new(instrument);
    let interval: Interval = interval.parse()?;
    let outcome = match Outcome::parse_lenient(&result) {
        Outcome::Unknown => bail!("result must be WIN or LOSS (got '{}')", result),
        outcome => outcome,
    };

    let store = open_store(&config)?;
    let book = CooldownBook::new(store.clone(), config.cooldown.clone());

    let Some(record) = book.record_outcome(&instrument, interval, outcome)? else {
        warn!("No alert on record for {} {}, nothing to update", instrument, interval);
        return Ok(());
    };
    info!(
        "Recorded {} for {} {} (alerted {})",
        record.outcome, instrument, interval, record.alert_time
    );

    let now = Utc::now();
    if let CooldownStatus::InCooldown { until } = book.status(&instrument, interval, now) {
        info!("Cooldown active until {}", until);
    }

    let budget = store.update_budget(now, &config.budget, DailyBudget::release_position)?;
    info!("Open positions: {}", budget.concurrent_positions);

    Ok(())
}

pub fn import(config: Config, file: PathBuf) -> Result<()> {
    let store = open_store(&config)?;
    let summary = store.import_cooldown_csv(&file)?;
    println!("Imported {} records ({} skipped)", summary.imported, summary.skipped);
    Ok(())
}
