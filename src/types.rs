//! Core data types shared by the scoring pipeline

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error, PartialEq)]
pub enum BarValidationError {
    #[error("non-finite value: open={open}, high={high}, low={low}, close={close}, volume={volume}")]
    NonFinite {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    },

    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV price bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(timestamp, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (trusted sources, tests)
    pub fn new_unchecked(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        if !self.has_finite_prices() || !self.volume.is_finite() {
            return Err(BarValidationError::NonFinite {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                volume: self.volume,
            });
        }

        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// True when open/high/low/close are all usable numbers.
    /// Volume is excluded: several instrument classes report none.
    pub fn has_finite_prices(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Column views over a bar series, built once per evaluation.
#[derive(Debug, Clone, Default)]
pub struct Columns {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl Columns {
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut cols = Columns {
            open: Vec::with_capacity(bars.len()),
            high: Vec::with_capacity(bars.len()),
            low: Vec::with_capacity(bars.len()),
            close: Vec::with_capacity(bars.len()),
            volume: Vec::with_capacity(bars.len()),
        };
        for bar in bars {
            cols.open.push(bar.open);
            cols.high.push(bar.high);
            cols.low.push(bar.low);
            cols.close.push(bar.close);
            cols.volume.push(bar.volume);
        }
        cols
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

/// Instrument identifier using Arc<str> for cheap cloning
///
/// Instruments are cloned into every evaluation, cooldown record and alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Instrument {
    pub fn new(s: impl AsRef<str>) -> Self {
        Instrument(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Instrument::new(s)
    }
}

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::M1,
        Interval::M5,
        Interval::M15,
        Interval::H1,
        Interval::H4,
        Interval::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::H1 => 60,
            Interval::H4 => 240,
            Interval::D1 => 1440,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown interval '{0}' (expected one of 1m, 5m, 15m, 1h, 4h, 1d)")]
pub struct ParseIntervalError(String);

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseIntervalError(s.to_string()))
    }
}

/// Coarse signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[default]
    #[serde(rename = "NONE")]
    Flat,
}

impl Direction {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::Flat)
    }

    /// +1 for Buy, -1 for Sell, 0 otherwise
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::Flat => 0.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Flat => "NONE",
        })
    }
}

/// Signal strength tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strength {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strength::Low => "LOW",
            Strength::Medium => "MEDIUM",
            Strength::High => "HIGH",
        })
    }
}

/// Result of a previously alerted trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
    #[default]
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "WIN",
            Outcome::Loss => "LOSS",
            Outcome::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse for persisted records: anything unrecognised is Unknown.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "WIN" => Outcome::Win,
            "LOSS" => Outcome::Loss,
            _ => Outcome::Unknown,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Money Type - Precise Decimal Arithmetic for Monetary Values
// ============================================================================

/// Monetary amount (account equity, risk budget, position quantity).
///
/// Wraps `rust_decimal::Decimal` so sizing results round exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Money(value)
    }

    /// Non-finite values collapse to zero.
    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::try_from(value).unwrap_or(Decimal::ZERO))
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap()
    }

    #[test]
    fn test_bar_validation() {
        assert!(Bar::new(ts(), 100.0, 101.0, 99.0, 100.5, 10.0).is_ok());
        assert_eq!(
            Bar::new(ts(), 100.0, 99.0, 101.0, 100.0, 10.0),
            Err(BarValidationError::HighLessThanLow { high: 99.0, low: 101.0 })
        );
        assert!(matches!(
            Bar::new(ts(), 100.0, 101.0, 99.0, f64::NAN, 10.0),
            Err(BarValidationError::NonFinite { .. })
        ));
        assert!(matches!(
            Bar::new(ts(), 100.0, 101.0, 99.0, 100.0, -1.0),
            Err(BarValidationError::NegativeVolume(_))
        ));
        assert!(matches!(
            Bar::new(ts(), 102.0, 101.0, 99.0, 100.0, 1.0),
            Err(BarValidationError::OpenOutOfRange { .. })
        ));
    }

    #[test]
    fn test_interval_parse_and_display() {
        assert_eq!("1h".parse::<Interval>().unwrap(), Interval::H1);
        assert_eq!("15M".parse::<Interval>().unwrap(), Interval::M15);
        assert!("2h".parse::<Interval>().is_err());
        assert_eq!(Interval::D1.to_string(), "1d");
        assert_eq!(serde_json::to_string(&Interval::M5).unwrap(), "\"5m\"");
    }

    #[test]
    fn test_direction_serde_names() {
        assert_eq!(serde_json::to_string(&Direction::Flat).unwrap(), "\"NONE\"");
        assert_eq!(Direction::Buy.to_string(), "BUY");
        assert!(!Direction::Flat.is_actionable());
    }

    #[test]
    fn test_outcome_lenient_parse() {
        assert_eq!(Outcome::parse_lenient("loss"), Outcome::Loss);
        assert_eq!(Outcome::parse_lenient(" WIN "), Outcome::Win);
        assert_eq!(Outcome::parse_lenient(""), Outcome::Unknown);
        assert_eq!(Outcome::parse_lenient("garbage"), Outcome::Unknown);
    }

    #[test]
    fn test_money_rounding() {
        let m = Money::from_f64(33.333333);
        assert_eq!(m.round_dp(4).to_string(), "33.3333");
        assert_eq!(Money::from_f64(f64::NAN), Money::ZERO);
    }
}
