//! Daily alert and concurrent-position counters
//!
//! Owned by the scheduling loop and passed into each scan. Both counters
//! reset when the local calendar date changes.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BudgetConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBudget {
    pub date: NaiveDate,
    pub alerts_sent: u32,
    pub concurrent_positions: u32,
}

/// Calendar date of `now` in `tz`, daylight saving included
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

impl DailyBudget {
    pub fn new(now: DateTime<Utc>, cfg: &BudgetConfig) -> Self {
        Self {
            date: local_date(now, cfg.timezone),
            alerts_sent: 0,
            concurrent_positions: 0,
        }
    }

    /// Reset both counters if the local date moved on. Returns true on reset.
    pub fn roll(&mut self, now: DateTime<Utc>, cfg: &BudgetConfig) -> bool {
        let today = local_date(now, cfg.timezone);
        if today == self.date {
            return false;
        }
        info!(
            "Daily budget reset ({} -> {}): {} alerts, {} positions",
            self.date, today, self.alerts_sent, self.concurrent_positions
        );
        *self = Self {
            date: today,
            alerts_sent: 0,
            concurrent_positions: 0,
        };
        true
    }

    pub fn is_exhausted(&self, cfg: &BudgetConfig) -> bool {
        self.alerts_sent >= cfg.max_daily_alerts || self.concurrent_positions >= cfg.max_concurrent_positions
    }

    pub fn remaining_alerts(&self, cfg: &BudgetConfig) -> u32 {
        cfg.max_daily_alerts.saturating_sub(self.alerts_sent)
    }

    pub fn record_alert(&mut self) {
        self.alerts_sent += 1;
        self.concurrent_positions += 1;
    }

    /// A position was closed (an outcome was recorded)
    pub fn release_position(&mut self) {
        self.concurrent_positions = self.concurrent_positions.saturating_sub(1);
    }
}
