//! Scan command implementation

use anyhow::Result;
use chrono::{DateTime, Utc};
use signal_gate::budget::DailyBudget;
use signal_gate::scanner::{Decision, ScanReport, Scanner};
use signal_gate::store::SqliteStore;
use signal_gate::Config;
use std::sync::Arc;
use tracing::warn;

use super::{build_scanner, open_store};

pub fn run(config: Config, json: bool) -> Result<()> {
    let store = open_store(&config)?;
    let scanner = build_scanner(config, store.clone());
    let report = scan_once(&scanner, &store, Utc::now())?;
    print_report(&report, json)
}

/// One scan against the stored budget. Only the alerts this scan sent are
/// written back, so positions released meanwhile are not lost.
pub fn scan_once(
    scanner: &Scanner<Arc<SqliteStore>>,
    store: &SqliteStore,
    now: DateTime<Utc>,
) -> Result<ScanReport> {
    let cfg = &scanner.config().budget;
    let mut budget = match store.load_budget() {
        Ok(Some(budget)) => budget,
        Ok(None) => DailyBudget::new(now, cfg),
        Err(e) => {
            warn!("Budget state unreadable, starting fresh: {:#}", e);
            DailyBudget::new(now, cfg)
        }
    };
    let mut report = scanner.scan(&mut budget, now);
    let sent = report.alerts();
    report.budget = store.update_budget(now, cfg, |b| (0..sent).for_each(|_| b.record_alert()))?;
    Ok(report)
}

pub fn print_report(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60));
    println!("SCAN {}", report.at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{}", "=".repeat(60));
    if report.short_circuited {
        println!("Daily budget exhausted, nothing evaluated.");
    }
    for key in &report.keys {
        let label = format!("{} ({})", key.instrument, key.interval);
        match (&key.decision, &key.evaluation) {
            (Decision::Alert, Some(eval)) => println!(
                "ALERT    {:<22} {} {} p {:.0}%",
                label, eval.direction, eval.strength, eval.probability
            ),
            (Decision::Warning { change_pct }, _) => println!("WARNING  {:<22} {:+.2}%", label, change_pct),
            (Decision::Log, Some(eval)) => println!(
                "LOG      {:<22} score {:.2} p {:.0}%",
                label, eval.total_score, eval.probability
            ),
            (Decision::Skip(reason), _) => println!("SKIP     {:<22} {}", label, reason),
            (decision, None) => println!("{:?} {}", decision, label),
        }
    }
    for alignment in &report.alignments {
        println!("ALIGN    {:<22} {}", alignment.instrument, alignment.aligned);
    }
    println!("{}", "-".repeat(60));
    println!(
        "Alerts: {}  Warnings: {}  Skipped: {}  Sent today: {}  Open positions: {}",
        report.alerts(),
        report.warnings(),
        report.skipped(),
        report.budget.alerts_sent,
        report.budget.concurrent_positions
    );
    Ok(())
}
