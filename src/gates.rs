//! Quality gate chain
//!
//! Each gate is a function returning `Result<_, Rejection>` so the pipeline
//! can chain them with `?`; the first failure is the reported reason.
//! Order: data, session, ADX (with soft-pass), ATR%, band width, direction,
//! trend alignment, reward:risk.

use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics};
use std::fmt;

use crate::config::GateConfig;
use crate::indicators::IndicatorSnapshot;
use crate::types::{Bar, Direction};

/// Why a candidate signal was vetoed. Expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum Rejection {
    NoData { bars: usize, required: usize },
    MissingColumns { index: usize },
    Session,
    Adx { adx: Option<f64>, threshold: f64 },
    AtrPct { value: Option<f64>, min: f64 },
    BandSqueeze { value: Option<f64>, min: f64 },
    NoSignal,
    TrendDown,
    TrendUp,
    TrendUndefined,
    RewardRisk { rr: f64, min: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoData { .. } => write!(f, "no_data"),
            Rejection::MissingColumns { .. } => write!(f, "missing_columns"),
            Rejection::Session => write!(f, "session"),
            Rejection::Adx { threshold, .. } => write!(f, "adx<{}", threshold),
            Rejection::AtrPct { min, .. } => write!(f, "atr%<{}", min),
            Rejection::BandSqueeze { min, .. } => write!(f, "bb_squeeze<{}", min),
            Rejection::NoSignal => write!(f, "no_signal"),
            Rejection::TrendDown => write!(f, "trend_down"),
            Rejection::TrendUp => write!(f, "trend_up"),
            Rejection::TrendUndefined => write!(f, "trend_undefined"),
            Rejection::RewardRisk { min, .. } => write!(f, "rr<{}", min),
        }
    }
}

/// Empty, too short, or carrying non-finite prices.
pub fn check_data(bars: &[Bar], min_bars: usize) -> Result<(), Rejection> {
    if bars.is_empty() || bars.len() < min_bars {
        return Err(Rejection::NoData {
            bars: bars.len(),
            required: min_bars,
        });
    }
    if let Some(index) = bars.iter().position(|b| !b.has_finite_prices()) {
        return Err(Rejection::MissingColumns { index });
    }
    Ok(())
}

/// Passed ADX check; `soft_pass` marks a volatility override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdxPass {
    pub soft_pass: bool,
}

/// ADX below `threshold` survives only when volatility is high and the
/// combined score is strong. An undefined ADX counts as below.
pub fn check_adx(
    snap: &IndicatorSnapshot,
    total_score: f64,
    threshold: f64,
    cfg: &GateConfig,
) -> Result<AdxPass, Rejection> {
    if matches!(snap.adx, Some(adx) if adx >= threshold) {
        return Ok(AdxPass { soft_pass: false });
    }

    let volatile = snap.atr_pct.is_some_and(|v| v >= cfg.soft_pass_atr_pct)
        || snap.bb_width_pct.is_some_and(|v| v >= cfg.soft_pass_bbw_pct);
    if volatile && total_score >= cfg.soft_pass_min_score {
        return Ok(AdxPass { soft_pass: true });
    }

    Err(Rejection::Adx {
        adx: snap.adx,
        threshold,
    })
}

pub fn check_atr_pct(snap: &IndicatorSnapshot, cfg: &GateConfig) -> Result<(), Rejection> {
    match snap.atr_pct {
        Some(v) if v >= cfg.min_atr_pct => Ok(()),
        value => Err(Rejection::AtrPct {
            value,
            min: cfg.min_atr_pct,
        }),
    }
}

pub fn check_band_width(snap: &IndicatorSnapshot, cfg: &GateConfig) -> Result<(), Rejection> {
    match snap.bb_width_pct {
        Some(v) if v >= cfg.min_bbw_pct => Ok(()),
        value => Err(Rejection::BandSqueeze {
            value,
            min: cfg.min_bbw_pct,
        }),
    }
}

pub fn check_direction(direction: Direction) -> Result<Direction, Rejection> {
    if direction.is_actionable() {
        Ok(direction)
    } else {
        Err(Rejection::NoSignal)
    }
}

/// BUY needs the slow EMA above the trend EMA, SELL needs it at or below.
pub fn check_trend(direction: Direction, snap: &IndicatorSnapshot, cfg: &GateConfig) -> Result<(), Rejection> {
    if !cfg.trend_filter {
        return Ok(());
    }
    let (Some(slow), Some(trend)) = (snap.ema_slow, snap.ema_trend) else {
        return Err(Rejection::TrendUndefined);
    };
    match direction {
        Direction::Buy if slow <= trend => Err(Rejection::TrendDown),
        Direction::Sell if slow > trend => Err(Rejection::TrendUp),
        _ => Ok(()),
    }
}

pub fn check_reward_risk(rr: f64, cfg: &GateConfig) -> Result<(), Rejection> {
    if rr >= cfg.min_rr {
        Ok(())
    } else {
        Err(Rejection::RewardRisk { rr, min: cfg.min_rr })
    }
}

/// Non-blocking volume quality warning
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeWarning {
    pub last: f64,
    pub floor: f64,
}

/// Last-bar volume below the configured quantile of the series. Series
/// where nearly every bar reports zero volume are treated as unreported.
pub fn volume_warning(bars: &[Bar], cfg: &GateConfig) -> Option<VolumeWarning> {
    let last = bars.last()?.volume;
    let zeros = bars.iter().filter(|b| b.volume <= 0.0).count();
    if zeros as f64 / bars.len() as f64 > cfg.volume_zero_share {
        return None;
    }

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).filter(|v| v.is_finite()).collect();
    if volumes.is_empty() {
        return None;
    }
    let floor = Data::new(volumes).quantile(cfg.volume_quantile);
    (last < floor).then_some(VolumeWarning { last, floor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(volumes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| Bar::new_unchecked(start + Duration::hours(i as i64), 10.0, 11.0, 9.0, 10.0, v))
            .collect()
    }

    fn snap(adx: f64, atr_pct: f64, bbw: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 100.0,
            adx: Some(adx),
            atr_pct: Some(atr_pct),
            bb_width_pct: Some(bbw),
            ema_slow: Some(101.0),
            ema_trend: Some(100.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(Rejection::Adx { adx: Some(11.0), threshold: 12.0 }.to_string(), "adx<12");
        assert_eq!(Rejection::AtrPct { value: None, min: 0.2 }.to_string(), "atr%<0.2");
        assert_eq!(Rejection::BandSqueeze { value: Some(0.1), min: 0.25 }.to_string(), "bb_squeeze<0.25");
        assert_eq!(Rejection::RewardRisk { rr: 1.67, min: 1.8 }.to_string(), "rr<1.8");
        assert_eq!(Rejection::NoData { bars: 0, required: 60 }.to_string(), "no_data");
    }

    #[test]
    fn test_adx_soft_pass() {
        let cfg = GateConfig::default();
        let pass = check_adx(&snap(11.0, 0.6, 0.1), 3.5, 12.0, &cfg).unwrap();
        assert!(pass.soft_pass);

        let err = check_adx(&snap(11.0, 0.3, 0.1), 3.5, 12.0, &cfg).unwrap_err();
        assert_eq!(err.to_string(), "adx<12");

        // strong enough volatility but weak combo
        assert!(check_adx(&snap(11.0, 0.6, 0.1), 3.0, 12.0, &cfg).is_err());
        // band width alone can carry the override
        assert!(check_adx(&snap(11.0, 0.1, 0.7), 3.5, 12.0, &cfg).unwrap().soft_pass);
    }

    #[test]
    fn test_adx_above_threshold_is_hard_pass() {
        let pass = check_adx(&snap(20.0, 0.1, 0.1), 0.0, 12.0, &GateConfig::default()).unwrap();
        assert!(!pass.soft_pass);
    }

    #[test]
    fn test_undefined_adx_needs_soft_pass() {
        let mut s = snap(0.0, 0.1, 0.1);
        s.adx = None;
        assert!(matches!(
            check_adx(&s, 5.0, 12.0, &GateConfig::default()),
            Err(Rejection::Adx { adx: None, .. })
        ));
    }

    #[test]
    fn test_floors_reject_undefined() {
        let cfg = GateConfig::default();
        let mut s = snap(20.0, 0.19, 0.3);
        assert!(check_atr_pct(&s, &cfg).is_err());
        s.atr_pct = None;
        assert!(check_atr_pct(&s, &cfg).is_err());
        s.bb_width_pct = Some(0.24);
        assert!(check_band_width(&s, &cfg).is_err());
        s.bb_width_pct = Some(0.25);
        assert!(check_band_width(&s, &cfg).is_ok());
    }

    #[test]
    fn test_trend_alignment() {
        let cfg = GateConfig::default();
        let up = snap(20.0, 1.0, 1.0);
        assert!(check_trend(Direction::Buy, &up, &cfg).is_ok());
        assert_eq!(check_trend(Direction::Sell, &up, &cfg), Err(Rejection::TrendUp));

        let flat = IndicatorSnapshot {
            ema_slow: Some(100.0),
            ..up.clone()
        };
        assert_eq!(check_trend(Direction::Buy, &flat, &cfg), Err(Rejection::TrendDown));
        assert!(check_trend(Direction::Sell, &flat, &cfg).is_ok());

        let undefined = IndicatorSnapshot { ema_trend: None, ..up };
        assert_eq!(check_trend(Direction::Buy, &undefined, &cfg), Err(Rejection::TrendUndefined));
    }

    #[test]
    fn test_data_checks() {
        assert!(matches!(check_data(&[], 60), Err(Rejection::NoData { .. })));
        let mut series = bars(&[1.0; 60]);
        assert!(check_data(&series, 60).is_ok());
        assert!(check_data(&series[..59], 60).is_err());
        series[5].close = f64::NAN;
        assert_eq!(check_data(&series, 60), Err(Rejection::MissingColumns { index: 5 }));
    }

    #[test]
    fn test_volume_warning() {
        let cfg = GateConfig::default();
        let mut volumes = vec![100.0; 30];
        volumes[29] = 5.0;
        let warning = volume_warning(&bars(&volumes), &cfg).unwrap();
        assert_eq!(warning.last, 5.0);

        assert!(volume_warning(&bars(&[100.0; 30]), &cfg).is_none());

        // unreported volume never warns
        let mut zeros = vec![0.0; 100];
        zeros[0] = 10.0;
        assert!(volume_warning(&bars(&zeros), &cfg).is_none());
    }
}
