//! Per-(instrument, interval) evaluation
//!
//! Composite scorer → quality gates → exit levels → probability. Pure over
//! its inputs: the same bars, config and clock give the same [`Evaluation`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use tracing::debug;

use crate::analyzers::{self, Analyzer, SubScore};
use crate::config::Config;
use crate::gates::{self, AdxPass, Rejection, VolumeWarning};
use crate::indicators::IndicatorSnapshot;
use crate::probability;
use crate::risk::{self, Bands, ExitLevels};
use crate::scoring::{CompositeScore, IndicatorVotes};
use crate::session;
use crate::types::{Bar, Columns, Direction, Instrument, Interval, Money, Strength};

/// Everything that fired along the way, for display and audit
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub bars: usize,
    pub indicators: Option<IndicatorSnapshot>,
    pub votes: Option<IndicatorVotes>,
    pub indicator_score: i32,
    pub sub_scores: Vec<SubScore>,
    /// Direction before gating; a rejected evaluation reports NONE
    pub raw_direction: Direction,
    pub adx_threshold: Option<f64>,
    pub soft_pass: bool,
    pub volume_warning: Option<VolumeWarning>,
    pub undefined_indicators: Vec<&'static str>,
}

/// Output of one evaluation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub instrument: Instrument,
    pub interval: Interval,
    /// Timestamp of the last bar
    pub bar_time: Option<DateTime<Utc>>,
    pub total_score: f64,
    pub direction: Direction,
    pub strength: Strength,
    pub levels: Option<ExitLevels>,
    pub position_size: Money,
    pub probability: f64,
    pub rejection: Option<Rejection>,
    pub diagnostics: Diagnostics,
}

impl Evaluation {
    pub fn is_approved(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn rejection_reason(&self) -> Option<String> {
        self.rejection.as_ref().map(|r| r.to_string())
    }

    pub fn entry(&self) -> Option<f64> {
        self.levels.map(|l| l.entry)
    }

    /// One-line-per-item breakdown of votes, sub-scores and gates
    pub fn breakdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} | {} {} | score {:.2} | p {:.0}%",
            self.instrument, self.interval, self.direction, self.strength, self.total_score, self.probability
        );
        if let Some(votes) = &self.diagnostics.votes {
            let rendered: Vec<String> = votes
                .all()
                .iter()
                .map(|(name, vote)| format!("{}={:+}", name, vote.value()))
                .collect();
            let _ = writeln!(out, "  votes: {} (sum {})", rendered.join(" "), self.diagnostics.indicator_score);
        }
        for sub in &self.diagnostics.sub_scores {
            match &sub.fault {
                Some(fault) => {
                    let _ = writeln!(out, "  {}: {:+.2} ({})", sub.kind, sub.score, fault);
                }
                None => {
                    let _ = writeln!(out, "  {}: {:+.2}", sub.kind, sub.score);
                }
            }
        }
        if let Some(levels) = &self.levels {
            let _ = writeln!(
                out,
                "  entry {:.4} sl {:.4} tp {:.4} rr {:.2} size {}",
                levels.entry, levels.stop_loss, levels.take_profit, levels.reward_risk, self.position_size
            );
        }
        if self.diagnostics.soft_pass {
            let _ = writeln!(out, "  adx soft-pass");
        }
        if let Some(w) = &self.diagnostics.volume_warning {
            let _ = writeln!(out, "  low volume: {:.2} < {:.2}", w.last, w.floor);
        }
        if let Some(reason) = self.rejection_reason() {
            let _ = writeln!(out, "  rejected: {}", reason);
        }
        out
    }
}

struct Approved {
    adx: AdxPass,
    direction: Direction,
    levels: ExitLevels,
}

/// Scorer and gate chain bound to one configuration
pub struct Pipeline {
    config: Config,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            analyzers: analyzers::default_analyzers(),
        }
    }

    pub fn with_analyzers(config: Config, analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        Self { config, analyzers }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn evaluate(&self, instrument: &Instrument, interval: Interval, bars: &[Bar], now: DateTime<Utc>) -> Evaluation {
        let cfg = &self.config;
        let mut eval = Evaluation {
            instrument: instrument.clone(),
            interval,
            bar_time: bars.last().map(|b| b.timestamp),
            total_score: 0.0,
            direction: Direction::Flat,
            strength: Strength::Low,
            levels: None,
            position_size: Money::ZERO,
            probability: 0.0,
            rejection: None,
            diagnostics: Diagnostics {
                bars: bars.len(),
                ..Diagnostics::default()
            },
        };

        if let Err(rejection) = gates::check_data(bars, cfg.gates.min_bars) {
            return self.reject(eval, rejection);
        }
        if !session::is_active(&cfg.universe, instrument, now) {
            return self.reject(eval, Rejection::Session);
        }

        let cols = Columns::from_bars(bars);
        let snapshot = IndicatorSnapshot::compute(&cols, &cfg.indicators);
        let sub_scores = analyzers::run_all(&self.analyzers, bars);
        let composite = CompositeScore::new(&snapshot, sub_scores, &cfg.indicators);

        eval.total_score = composite.total_score;
        eval.strength = composite.strength;
        eval.diagnostics.votes = Some(composite.votes);
        eval.diagnostics.indicator_score = composite.indicator_score;
        eval.diagnostics.undefined_indicators = composite.votes.undefined();
        eval.diagnostics.raw_direction = composite.direction;
        eval.diagnostics.volume_warning = gates::volume_warning(bars, &cfg.gates);

        let threshold = cfg.adx_threshold(instrument, interval);
        eval.diagnostics.adx_threshold = Some(threshold);

        let result = self.run_gates(&snapshot, &composite, threshold, &mut eval.levels);
        eval.diagnostics.sub_scores = composite.sub_scores;
        eval.diagnostics.indicators = Some(snapshot.clone());

        match result {
            Ok(approved) => {
                let low_volume = eval.diagnostics.volume_warning.is_some();
                eval.direction = approved.direction;
                eval.diagnostics.soft_pass = approved.adx.soft_pass;
                eval.position_size = risk::position_size(approved.levels.entry, approved.levels.stop_loss, &cfg.risk);
                eval.probability = probability::estimate(
                    snapshot.adx.unwrap_or(0.0),
                    approved.levels.reward_risk,
                    approved.adx.soft_pass,
                    low_volume,
                    &cfg.probability,
                );
                eval.levels = Some(approved.levels);
                debug!(
                    instrument = %instrument,
                    interval = %interval,
                    direction = %eval.direction,
                    probability = eval.probability,
                    "evaluation approved"
                );
                eval
            }
            Err(rejection) => self.reject(eval, rejection),
        }
    }

    /// Gates 3..=8. `levels` is filled once computed so a reward:risk
    /// rejection still reports them.
    fn run_gates(
        &self,
        snap: &IndicatorSnapshot,
        composite: &CompositeScore,
        threshold: f64,
        levels: &mut Option<ExitLevels>,
    ) -> Result<Approved, Rejection> {
        let gates_cfg = &self.config.gates;

        let adx = gates::check_adx(snap, composite.total_score, threshold, gates_cfg)?;
        gates::check_atr_pct(snap, gates_cfg)?;
        gates::check_band_width(snap, gates_cfg)?;
        let direction = gates::check_direction(composite.direction)?;
        gates::check_trend(direction, snap, gates_cfg)?;

        let bands = match (snap.bb_upper, snap.bb_lower) {
            (Some(upper), Some(lower)) => Some(Bands { upper, lower }),
            _ => None,
        };
        let computed = snap
            .atr
            .and_then(|atr| risk::exit_levels(direction, snap.close, atr, bands, &self.config.risk))
            .ok_or(Rejection::AtrPct {
                value: snap.atr_pct,
                min: gates_cfg.min_atr_pct,
            })?;
        *levels = Some(computed);

        gates::check_reward_risk(computed.reward_risk, gates_cfg)?;

        Ok(Approved {
            adx,
            direction,
            levels: computed,
        })
    }

    fn reject(&self, mut eval: Evaluation, rejection: Rejection) -> Evaluation {
        debug!(
            instrument = %eval.instrument,
            interval = %eval.interval,
            reason = %rejection,
            "evaluation rejected"
        );
        eval.direction = Direction::Flat;
        eval.position_size = Money::ZERO;
        eval.probability = probability::score_to_probability(eval.total_score);
        eval.rejection = Some(rejection);
        eval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn flat_bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Bar::new_unchecked(start + Duration::hours(i as i64), 100.0, 100.0, 100.0, 100.0, 0.0))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_series_is_no_data() {
        let pipeline = Pipeline::new(Config::default());
        let eval = pipeline.evaluate(&Instrument::new("BTC-USD"), Interval::H1, &[], now());
        assert_eq!(eval.rejection_reason().as_deref(), Some("no_data"));
        assert_eq!(eval.direction, Direction::Flat);
        assert!(eval.levels.is_none());
        assert_eq!(eval.probability, 20.0);
    }

    #[test]
    fn test_short_series_is_no_data() {
        let pipeline = Pipeline::new(Config::default());
        let eval = pipeline.evaluate(&Instrument::new("BTC-USD"), Interval::H1, &flat_bars(59), now());
        assert_eq!(eval.rejection_reason().as_deref(), Some("no_data"));
    }

    #[test]
    fn test_outside_session_rejected_before_scoring() {
        let pipeline = Pipeline::new(Config::default());
        let night = Utc.with_ymd_and_hms(2024, 6, 3, 2, 0, 0).unwrap();
        let eval = pipeline.evaluate(&Instrument::new("GOLD"), Interval::H1, &flat_bars(80), night);
        assert_eq!(eval.rejection, Some(Rejection::Session));
        assert!(eval.diagnostics.votes.is_none());
    }

    #[test]
    fn test_flat_market_fails_adx() {
        let pipeline = Pipeline::new(Config::default());
        let eval = pipeline.evaluate(&Instrument::new("BTC-USD"), Interval::H1, &flat_bars(80), now());
        // DI undefined with zero ATR, so ADX is too
        assert_eq!(eval.rejection_reason().as_deref(), Some("adx<14"));
        assert_eq!(eval.diagnostics.adx_threshold, Some(14.0));
        assert_eq!(eval.diagnostics.sub_scores.len(), 7);
    }
}
