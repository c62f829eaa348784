//! Per-(instrument, interval) re-alert cooldown
//!
//! Records are append-only and the latest one for a key is authoritative.
//! Its outcome picks the timer (LOSS gets the longer one); expiry is
//! re-checked against the clock on every call. Store faults fail open.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::config::CooldownConfig;
use crate::types::{Instrument, Interval, Outcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub instrument: Instrument,
    pub interval: Interval,
    pub alert_time: DateTime<Utc>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CooldownStatus {
    CooledDown,
    InCooldown { until: DateTime<Utc> },
}

impl CooldownStatus {
    pub fn is_permitted(&self) -> bool {
        matches!(self, CooldownStatus::CooledDown)
    }
}

/// Durable log of cooldown records
pub trait CooldownStore: Send + Sync {
    fn append(&self, record: &CooldownRecord) -> Result<()>;

    fn latest(&self, instrument: &Instrument, interval: Interval) -> Result<Option<CooldownRecord>>;
}

impl<T: CooldownStore + ?Sized> CooldownStore for Arc<T> {
    fn append(&self, record: &CooldownRecord) -> Result<()> {
        (**self).append(record)
    }

    fn latest(&self, instrument: &Instrument, interval: Interval) -> Result<Option<CooldownRecord>> {
        (**self).latest(instrument, interval)
    }
}

/// In-process store; the whole log lives behind one mutex
#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    records: Mutex<Vec<CooldownRecord>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CooldownStore for MemoryCooldownStore {
    fn append(&self, record: &CooldownRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("cooldown store lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn latest(&self, instrument: &Instrument, interval: Interval) -> Result<Option<CooldownRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("cooldown store lock poisoned"))?;
        Ok(records
            .iter()
            .rev()
            .find(|r| &r.instrument == instrument && r.interval == interval)
            .cloned())
    }
}

/// Cooldown decisions over a store
pub struct CooldownBook<S: CooldownStore> {
    store: S,
    cfg: CooldownConfig,
}

impl<S: CooldownStore> CooldownBook<S> {
    pub fn new(store: S, cfg: CooldownConfig) -> Self {
        Self { store, cfg }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Timer length started by a record with `outcome`
    pub fn timer_for(&self, outcome: Outcome) -> Duration {
        match outcome {
            Outcome::Loss => Duration::minutes(self.cfg.after_loss_minutes),
            Outcome::Win | Outcome::Unknown => Duration::minutes(self.cfg.minutes),
        }
    }

    pub fn status(&self, instrument: &Instrument, interval: Interval, now: DateTime<Utc>) -> CooldownStatus {
        match self.store.latest(instrument, interval) {
            Ok(Some(record)) => {
                let until = record.alert_time + self.timer_for(record.outcome);
                if now >= until {
                    CooldownStatus::CooledDown
                } else {
                    CooldownStatus::InCooldown { until }
                }
            }
            Ok(None) => CooldownStatus::CooledDown,
            Err(e) => {
                warn!(instrument = %instrument, interval = %interval, "cooldown lookup failed, allowing: {:#}", e);
                CooldownStatus::CooledDown
            }
        }
    }

    pub fn is_permitted(&self, instrument: &Instrument, interval: Interval, now: DateTime<Utc>) -> bool {
        self.status(instrument, interval, now).is_permitted()
    }

    pub fn record_alert(&self, instrument: &Instrument, interval: Interval, at: DateTime<Utc>) -> Result<()> {
        self.store.append(&CooldownRecord {
            instrument: instrument.clone(),
            interval,
            alert_time: at,
            outcome: Outcome::Unknown,
        })
    }

    /// Attach an outcome to the last alert for the key. Returns the appended
    /// record, or `None` when the key was never alerted.
    pub fn record_outcome(
        &self,
        instrument: &Instrument,
        interval: Interval,
        outcome: Outcome,
    ) -> Result<Option<CooldownRecord>> {
        let Some(last) = self.store.latest(instrument, interval)? else {
            return Ok(None);
        };
        let record = CooldownRecord {
            outcome,
            ..last
        };
        self.store.append(&record)?;
        Ok(Some(record))
    }
}
