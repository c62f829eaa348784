//! Trading-session windows
//!
//! A window is written "HHMM-HHMM" in the local clock. Windows whose start is
//! after their end wrap past midnight ("2200-0600").

use chrono::{DateTime, NaiveTime, Utc};

use crate::config::UniverseConfig;
use crate::types::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    pub fn parse(spec: &str) -> Option<Self> {
        let (start, end) = spec.trim().split_once('-')?;
        Some(Self {
            start: NaiveTime::parse_from_str(start.trim(), "%H%M").ok()?,
            end: NaiveTime::parse_from_str(end.trim(), "%H%M").ok()?,
        })
    }

    /// Inclusive on both ends.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

/// Whether `instrument` may be evaluated at `now`.
///
/// Instruments without a window trade around the clock, and so does anything
/// whose window cannot be parsed.
pub fn is_active(universe: &UniverseConfig, instrument: &Instrument, now: DateTime<Utc>) -> bool {
    if !universe.session_filter {
        return true;
    }
    let Some(spec) = universe.sessions.get(instrument.as_str()) else {
        return true;
    };
    let Some(window) = SessionWindow::parse(spec) else {
        return true;
    };
    window.contains(now.with_timezone(&universe.session_timezone).time())
}
