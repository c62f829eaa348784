//! SQLite-backed cooldown log and alert audit trail
//!
//! Cooldown rows are append-only; the highest rowid for a key wins.
//! WAL mode so the outcome command can write while a scan loop reads.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::budget::DailyBudget;
use crate::config::BudgetConfig;
use crate::cooldown::{CooldownRecord, CooldownStore};
use crate::data::parse_timestamp;
use crate::pipeline::Evaluation;
use crate::types::{Direction, Instrument, Interval, Outcome, Strength};

pub const DB_FILE: &str = "signal_gate.db";

// =============================================================================
// Data Models
// =============================================================================

/// One emitted alert, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Option<i64>,
    pub instrument: String,
    pub interval: String,
    pub alert_time: String,
    pub direction: Direction,
    pub strength: Strength,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reward_risk: f64,
    pub probability: f64,
    pub total_score: f64,
    pub position_size: String,
    /// Serialized diagnostics
    pub diagnostics: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

// =============================================================================
// Store
// =============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) `state_dir/signal_gate.db`
    pub fn open<P: AsRef<Path>>(state_dir: P) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state dir: {}", state_dir.display()))?;
        let db_path = state_dir.join(DB_FILE);

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self { conn: Mutex::new(conn) };
        store.create_tables()?;
        info!("SQLite store initialized at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cooldowns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument TEXT NOT NULL,
                interval TEXT NOT NULL,
                alert_time TEXT NOT NULL,
                outcome TEXT NOT NULL DEFAULT 'UNKNOWN',
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument TEXT NOT NULL,
                interval TEXT NOT NULL,
                alert_time TEXT NOT NULL,
                direction TEXT NOT NULL,
                strength TEXT NOT NULL,
                entry REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                reward_risk REAL NOT NULL,
                probability REAL NOT NULL,
                total_score REAL NOT NULL,
                position_size TEXT NOT NULL,
                diagnostics TEXT DEFAULT '{}',
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS budget (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                date TEXT NOT NULL,
                alerts_sent INTEGER NOT NULL,
                concurrent_positions INTEGER NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cooldowns_key ON cooldowns(instrument, interval)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    /// Store an approved evaluation as an alert row
    pub fn save_alert(&self, eval: &Evaluation, at: DateTime<Utc>) -> Result<i64> {
        let levels = eval
            .levels
            .ok_or_else(|| anyhow!("alert for {} {} has no exit levels", eval.instrument, eval.interval))?;
        let diagnostics = serde_json::to_string(&eval.diagnostics)?;
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO alerts
             (instrument, interval, alert_time, direction, strength, entry, stop_loss,
              take_profit, reward_risk, probability, total_score, position_size, diagnostics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                eval.instrument.as_str(),
                eval.interval.as_str(),
                at.to_rfc3339(),
                eval.direction.to_string(),
                eval.strength.to_string(),
                levels.entry,
                levels.stop_loss,
                levels.take_profit,
                levels.reward_risk,
                eval.probability,
                eval.total_score,
                eval.position_size.to_string(),
                diagnostics,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!("Alert saved: #{} {} {} {}", id, eval.instrument, eval.interval, eval.direction);
        Ok(id)
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, instrument, interval, alert_time, direction, strength, entry, stop_loss,
                    take_profit, reward_risk, probability, total_score, position_size, diagnostics
             FROM alerts ORDER BY id DESC LIMIT ?1",
        )?;

        let alerts = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AlertRecord {
                    id: row.get(0)?,
                    instrument: row.get(1)?,
                    interval: row.get(2)?,
                    alert_time: row.get(3)?,
                    direction: parse_direction(&row.get::<_, String>(4)?),
                    strength: parse_strength(&row.get::<_, String>(5)?),
                    entry: row.get(6)?,
                    stop_loss: row.get(7)?,
                    take_profit: row.get(8)?,
                    reward_risk: row.get(9)?,
                    probability: row.get(10)?,
                    total_score: row.get(11)?,
                    position_size: row.get(12)?,
                    diagnostics: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    pub fn load_budget(&self) -> Result<Option<DailyBudget>> {
        let conn = self.conn()?;
        read_budget(&conn)
    }

    /// Read-modify-write of the budget row inside one immediate transaction.
    ///
    /// The stored row is rolled to the local date of `now` before `apply`
    /// runs, so each caller only contributes its own change and concurrent
    /// scan and outcome processes never overwrite each other's counts.
    pub fn update_budget<F>(&self, now: DateTime<Utc>, cfg: &BudgetConfig, apply: F) -> Result<DailyBudget>
    where
        F: FnOnce(&mut DailyBudget),
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored = match read_budget(&tx) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Budget state unreadable, starting fresh: {:#}", e);
                None
            }
        };
        let mut budget = stored.unwrap_or_else(|| DailyBudget::new(now, cfg));
        budget.roll(now, cfg);
        apply(&mut budget);

        write_budget(&tx, &budget)?;
        tx.commit()?;
        debug!(
            "Budget saved: {} alerts={} positions={}",
            budget.date, budget.alerts_sent, budget.concurrent_positions
        );
        Ok(budget)
    }

    /// One-shot import of a legacy cooldown CSV
    /// (asset, interval, timestamp | last_alert_time, result).
    /// Rows that cannot be parsed are skipped.
    pub fn import_cooldown_csv<P: AsRef<Path>>(&self, path: P) -> Result<ImportSummary> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open cooldown CSV: {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let column = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };
        let asset_col = column(&["asset", "instrument"]).ok_or_else(|| anyhow!("missing 'asset' column"))?;
        let interval_col = column(&["interval"]).ok_or_else(|| anyhow!("missing 'interval' column"))?;
        let time_col = column(&["timestamp", "last_alert_time"])
            .ok_or_else(|| anyhow!("missing 'timestamp' column"))?;
        let result_col = column(&["result", "outcome"]);

        let mut summary = ImportSummary::default();
        for row in reader.records() {
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    debug!("Skipping unreadable cooldown row: {}", e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let parsed = (|| {
                let asset = row.get(asset_col).filter(|s| !s.is_empty())?;
                let interval: Interval = row.get(interval_col)?.parse().ok()?;
                let alert_time = parse_timestamp(row.get(time_col)?)?;
                let outcome = result_col
                    .and_then(|c| row.get(c))
                    .map(Outcome::parse_lenient)
                    .unwrap_or_default();
                Some(CooldownRecord {
                    instrument: Instrument::new(asset),
                    interval,
                    alert_time,
                    outcome,
                })
            })();

            match parsed {
                Some(record) => {
                    self.append(&record)?;
                    summary.imported += 1;
                }
                None => summary.skipped += 1,
            }
        }

        if summary.skipped > 0 {
            warn!("Cooldown import skipped {} malformed rows", summary.skipped);
        }
        info!("Imported {} cooldown records from {}", summary.imported, path.display());
        Ok(summary)
    }
}

impl CooldownStore for SqliteStore {
    fn append(&self, record: &CooldownRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cooldowns (instrument, interval, alert_time, outcome) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.instrument.as_str(),
                record.interval.as_str(),
                record.alert_time.to_rfc3339(),
                record.outcome.as_str(),
            ],
        )?;
        debug!(
            "Cooldown record appended: {} {} {} {}",
            record.instrument, record.interval, record.alert_time, record.outcome
        );
        Ok(())
    }

    fn latest(&self, instrument: &Instrument, interval: Interval) -> Result<Option<CooldownRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT alert_time, outcome FROM cooldowns
                 WHERE instrument = ?1 AND interval = ?2
                 ORDER BY id DESC LIMIT 1",
                params![instrument.as_str(), interval.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        let Some((time, outcome)) = row else {
            return Ok(None);
        };
        let alert_time =
            parse_timestamp(&time).ok_or_else(|| anyhow!("corrupt alert_time '{}' for {} {}", time, instrument, interval))?;

        Ok(Some(CooldownRecord {
            instrument: instrument.clone(),
            interval,
            alert_time,
            outcome: outcome.as_deref().map(Outcome::parse_lenient).unwrap_or_default(),
        }))
    }
}

fn read_budget(conn: &Connection) -> Result<Option<DailyBudget>> {
    let row = conn
        .query_row(
            "SELECT date, alerts_sent, concurrent_positions FROM budget WHERE id = 1",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?, row.get::<_, u32>(2)?)),
        )
        .optional()?;

    let Some((date, alerts_sent, concurrent_positions)) = row else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .with_context(|| format!("corrupt budget date '{}'", date))?;
    Ok(Some(DailyBudget {
        date,
        alerts_sent,
        concurrent_positions,
    }))
}

fn write_budget(conn: &Connection, budget: &DailyBudget) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO budget (id, date, alerts_sent, concurrent_positions, updated_at)
         VALUES (1, ?1, ?2, ?3, CURRENT_TIMESTAMP)",
        params![
            budget.date.format("%Y-%m-%d").to_string(),
            budget.alerts_sent,
            budget.concurrent_positions
        ],
    )?;
    Ok(())
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "BUY" => Direction::Buy,
        "SELL" => Direction::Sell,
        _ => Direction::Flat,
    }
}

fn parse_strength(s: &str) -> Strength {
    match s {
        "HIGH" => Strength::High,
        "MEDIUM" => Strength::Medium,
        _ => Strength::Low,
    }
}
