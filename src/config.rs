//! Configuration management
//!
//! One explicit configuration struct loaded from JSON, patched from the
//! environment and validated once at startup. Every section has complete
//! defaults so a partial file (or none at all) is usable.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::{Instrument, Interval, Money};

/// Startup validation failures
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("universe must contain at least one instrument and one interval")]
    EmptyUniverse,

    #[error("{name} must be positive (got {value})")]
    NonPositive { name: &'static str, value: f64 },

    #[error("min_bars ({min_bars}) is shorter than the longest indicator warm-up ({required})")]
    WarmupTooShort { min_bars: usize, required: usize },

    #[error("cooldown after loss ({after_loss} min) must not be shorter than the default ({default} min)")]
    CooldownOrder { default: i64, after_loss: i64 },

    #[error("risk_pct must be within (0, 100] (got {0})")]
    RiskPctOutOfRange(f64),

    #[error("invalid session window for {instrument}: '{window}'")]
    InvalidSession { instrument: String, window: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub universe: UniverseConfig,
    pub indicators: IndicatorConfig,
    pub gates: GateConfig,
    pub risk: RiskConfig,
    pub probability: ProbabilityConfig,
    pub cooldown: CooldownConfig,
    pub budget: BudgetConfig,
    pub alerts: AlertConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env_overrides()?;
        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    /// Environment variables win over file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("SIGNAL_GATE_DATA_DIR") {
            self.scheduler.data_dir = dir;
        }
        if let Ok(dir) = std::env::var("SIGNAL_GATE_STATE_DIR") {
            self.scheduler.state_dir = dir;
        }
        if let Ok(equity) = std::env::var("SIGNAL_GATE_EQUITY") {
            let value: f64 = equity
                .parse()
                .with_context(|| format!("SIGNAL_GATE_EQUITY is not a number: {}", equity))?;
            self.risk.equity = Money::from_f64(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.universe.instruments.is_empty() || self.universe.intervals.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }

        let ind = &self.indicators;
        for (name, value) in [
            ("indicators.ema_fast", ind.ema_fast),
            ("indicators.ema_slow", ind.ema_slow),
            ("indicators.ema_trend", ind.ema_trend),
            ("indicators.rsi_period", ind.rsi_period),
            ("indicators.macd_fast", ind.macd_fast),
            ("indicators.macd_slow", ind.macd_slow),
            ("indicators.macd_signal", ind.macd_signal),
            ("indicators.adx_period", ind.adx_period),
            ("indicators.bb_period", ind.bb_period),
            ("indicators.atr_period", ind.atr_period),
            ("indicators.volume_ma_period", ind.volume_ma_period),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositive { name, value: 0.0 });
            }
        }

        let required = ind.core_warmup();
        if self.gates.min_bars < required {
            return Err(ConfigError::WarmupTooShort {
                min_bars: self.gates.min_bars,
                required,
            });
        }

        for (name, value) in [
            ("indicators.bb_std", ind.bb_std),
            ("indicators.volume_spike_mult", ind.volume_spike_mult),
            ("risk.sl_atr_mult", self.risk.sl_atr_mult),
            ("risk.tp_atr_mult", self.risk.tp_atr_mult),
            ("risk.trailing_atr_mult", self.risk.trailing_atr_mult),
            ("risk.breakeven_at_rr", self.risk.breakeven_at_rr),
            ("gates.min_rr", self.gates.min_rr),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if !self.risk.equity.is_positive() {
            return Err(ConfigError::NonPositive {
                name: "risk.equity",
                value: self.risk.equity.to_f64(),
            });
        }

        if !(self.risk.risk_pct > 0.0 && self.risk.risk_pct <= 100.0) {
            return Err(ConfigError::RiskPctOutOfRange(self.risk.risk_pct));
        }

        if self.cooldown.minutes <= 0 {
            return Err(ConfigError::NonPositive {
                name: "cooldown.minutes",
                value: self.cooldown.minutes as f64,
            });
        }
        if self.cooldown.after_loss_minutes < self.cooldown.minutes {
            return Err(ConfigError::CooldownOrder {
                default: self.cooldown.minutes,
                after_loss: self.cooldown.after_loss_minutes,
            });
        }

        if self.budget.max_daily_alerts == 0 || self.budget.max_concurrent_positions == 0 {
            return Err(ConfigError::NonPositive {
                name: "budget limits",
                value: 0.0,
            });
        }

        for (instrument, window) in &self.universe.sessions {
            if crate::session::SessionWindow::parse(window).is_none() {
                return Err(ConfigError::InvalidSession {
                    instrument: instrument.clone(),
                    window: window.clone(),
                });
            }
        }

        Ok(())
    }

    /// Required ADX for a key: interval base (or fallback) plus instrument adjustment.
    pub fn adx_threshold(&self, instrument: &Instrument, interval: Interval) -> f64 {
        let base = self
            .gates
            .adx_by_interval
            .get(&interval)
            .copied()
            .unwrap_or(self.gates.min_adx);
        let adjust = self
            .gates
            .adx_adjust_by_instrument
            .get(instrument.as_str())
            .copied()
            .unwrap_or(0.0);
        base + adjust
    }

    pub fn instruments(&self) -> Vec<Instrument> {
        self.universe.instruments.iter().map(Instrument::new).collect()
    }
}

/// Instrument × interval universe and session windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub instruments: Vec<String>,
    pub intervals: Vec<Interval>,
    /// Instrument -> "HHMM-HHMM" local trading window; absent means 24h
    pub sessions: BTreeMap<String, String>,
    pub session_filter: bool,
    /// IANA zone of the clock session windows are written in
    pub session_timezone: Tz,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        let instruments = [
            "BTC-USD", "ETH-USD", "SOL-USD", "EURUSD=X", "AUDJPY=X", "USDJPY=X", "GBPUSD=X", "GOLD",
            "SILVER", "^GSPC", "^DJI", "^IXIC", "FTSE100", "NASDAQ", "DJ30",
        ];
        let us_session = ["GOLD", "SILVER", "^GSPC", "^DJI", "^IXIC", "NASDAQ", "DJ30"];

        let mut sessions: BTreeMap<String, String> = us_session
            .iter()
            .map(|s| (s.to_string(), "1530-2200".to_string()))
            .collect();
        sessions.insert("FTSE100".to_string(), "0900-1730".to_string());

        Self {
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            intervals: Interval::ALL.to_vec(),
            sessions,
            session_filter: true,
            session_timezone: chrono_tz::Europe::Amsterdam,
        }
    }
}

/// Indicator periods and vote thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Long EMA for the trend-alignment gate
    pub ema_trend: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub adx_period: usize,
    /// ADX above this casts a +1 vote
    pub adx_trend: f64,
    pub bb_period: usize,
    pub bb_std: f64,
    pub atr_period: usize,
    pub volume_ma_period: usize,
    pub volume_ma_min_periods: usize,
    pub volume_spike_mult: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            ema_trend: 200,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            adx_period: 14,
            adx_trend: 25.0,
            bb_period: 20,
            bb_std: 2.0,
            atr_period: 14,
            volume_ma_period: 20,
            volume_ma_min_periods: 10,
            volume_spike_mult: 1.8,
        }
    }
}

impl IndicatorConfig {
    /// Bars needed before every voting indicator is defined.
    /// The trend EMA is seeded from the first bar and needs none.
    pub fn core_warmup(&self) -> usize {
        [
            self.ema_fast,
            self.ema_slow,
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal - 1,
            2 * self.adx_period - 1,
            self.bb_period,
            self.atr_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Quality gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub min_bars: usize,
    pub adx_by_interval: BTreeMap<Interval, f64>,
    /// Fallback when an interval has no entry
    pub min_adx: f64,
    pub adx_adjust_by_instrument: BTreeMap<String, f64>,
    pub soft_pass_atr_pct: f64,
    pub soft_pass_bbw_pct: f64,
    pub soft_pass_min_score: f64,
    pub min_atr_pct: f64,
    pub min_bbw_pct: f64,
    pub min_rr: f64,
    pub trend_filter: bool,
    pub volume_quantile: f64,
    /// Share of zero-volume bars above which volume is considered unreported
    pub volume_zero_share: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        let adx_by_interval = [
            (Interval::M1, 12.0),
            (Interval::M5, 12.0),
            (Interval::M15, 14.0),
            (Interval::H1, 16.0),
            (Interval::H4, 18.0),
            (Interval::D1, 20.0),
        ]
        .into_iter()
        .collect();

        let adx_adjust_by_instrument = [("BTC-USD", -2.0), ("ETH-USD", -2.0), ("SOL-USD", -1.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Self {
            min_bars: 60,
            adx_by_interval,
            min_adx: 14.0,
            adx_adjust_by_instrument,
            soft_pass_atr_pct: 0.5,
            soft_pass_bbw_pct: 0.6,
            soft_pass_min_score: 3.2,
            min_atr_pct: 0.20,
            min_bbw_pct: 0.25,
            min_rr: 1.8,
            trend_filter: true,
            volume_quantile: 0.2,
            volume_zero_share: 0.95,
        }
    }
}

/// Exit level and sizing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub trailing_atr_mult: f64,
    /// Fraction of the target distance that must be in profit before trailing
    pub trailing_activation: f64,
    pub use_trailing: bool,
    pub breakeven_at_rr: f64,
    pub partial_tp_rr: f64,
    /// Cap the target at the opposite Bollinger band
    pub tp_at_band: bool,
    /// Tighten the stop to the near Bollinger band
    pub sl_at_band: bool,
    pub equity: Money,
    /// Percent of equity risked per trade (1.0 = 1%)
    pub risk_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            sl_atr_mult: 1.5,
            tp_atr_mult: 2.5,
            trailing_atr_mult: 1.0,
            trailing_activation: 0.5,
            use_trailing: true,
            breakeven_at_rr: 1.2,
            partial_tp_rr: 1.0,
            tp_at_band: false,
            sl_at_band: false,
            equity: Money::new(dec!(10000)),
            risk_pct: 1.0,
        }
    }
}

impl RiskConfig {
    pub fn with_multipliers(mut self, sl: f64, tp: f64) -> Self {
        self.sl_atr_mult = sl;
        self.tp_atr_mult = tp;
        self
    }

    pub fn with_trailing(mut self, enabled: bool, atr_mult: f64) -> Self {
        self.use_trailing = enabled;
        self.trailing_atr_mult = atr_mult;
        self
    }

    pub fn with_breakeven_at(mut self, rr: f64) -> Self {
        self.breakeven_at_rr = rr;
        self
    }

    pub fn with_band_clamp(mut self, tp: bool, sl: bool) -> Self {
        self.tp_at_band = tp;
        self.sl_at_band = sl;
        self
    }
}

/// Probability estimate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbabilityConfig {
    pub min_probability: f64,
    pub cap: f64,
    pub soft_pass_penalty: f64,
    pub soft_pass_floor: f64,
    pub low_volume_penalty: f64,
    pub low_volume_floor: f64,
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self {
            min_probability: 60.0,
            cap: 95.0,
            soft_pass_penalty: 12.0,
            soft_pass_floor: 10.0,
            low_volume_penalty: 10.0,
            low_volume_floor: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub minutes: i64,
    pub after_loss_minutes: i64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            minutes: 20,
            after_loss_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_daily_alerts: u32,
    pub max_concurrent_positions: u32,
    /// IANA zone whose calendar date drives the daily reset
    pub timezone: Tz,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_daily_alerts: 12,
            max_concurrent_positions: 3,
            timezone: chrono_tz::Europe::Amsterdam,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Last-bar change (%) below which a warning is raised
    pub warning_drop_pct: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            warning_drop_pct: -2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub data_dir: String,
    pub state_dir: String,
    pub scan_interval_secs: u64,
    pub parallel: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            state_dir: "state".to_string(),
            scan_interval_secs: 300,
            parallel: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.indicators.core_warmup(), 50);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "gates": { "min_rr": 2.0 }, "cooldown": { "minutes": 15 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.gates.min_rr, 2.0);
        assert_eq!(config.gates.min_bars, 60);
        assert_eq!(config.cooldown.minutes, 15);
        assert_eq!(config.cooldown.after_loss_minutes, 30);
        assert_eq!(config.risk.sl_atr_mult, 1.5);
    }

    #[test]
    fn test_adx_threshold_with_adjustment() {
        let config = Config::default();
        assert_eq!(config.adx_threshold(&Instrument::new("GOLD"), Interval::M1), 12.0);
        assert_eq!(config.adx_threshold(&Instrument::new("BTC-USD"), Interval::D1), 18.0);
        assert_eq!(config.adx_threshold(&Instrument::new("SOL-USD"), Interval::H1), 15.0);
    }

    #[test]
    fn test_adx_threshold_fallback() {
        let mut config = Config::default();
        config.gates.adx_by_interval.remove(&Interval::H4);
        assert_eq!(config.adx_threshold(&Instrument::new("GOLD"), Interval::H4), 14.0);
    }

    #[test]
    fn test_interval_keys_round_trip_json() {
        let json = r#"{ "gates": { "adx_by_interval": { "1h": 22.0 } } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.gates.adx_by_interval.get(&Interval::H1), Some(&22.0));
        assert_eq!(config.gates.adx_by_interval.len(), 1);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.gates.min_bars = 20;
        assert!(matches!(config.validate(), Err(ConfigError::WarmupTooShort { .. })));

        let mut config = Config::default();
        config.cooldown.after_loss_minutes = 5;
        assert!(matches!(config.validate(), Err(ConfigError::CooldownOrder { .. })));

        let mut config = Config::default();
        config.risk.risk_pct = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::RiskPctOutOfRange(0.0)));

        let mut config = Config::default();
        config.universe.instruments.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyUniverse));

        let mut config = Config::default();
        config.universe.sessions.insert("GOLD".into(), "25xx".into());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSession { .. })));
    }
}
