//! Composite scorer
//!
//! Six indicator votes decide direction and strength; the sub-analyzer
//! scores are added on top to form the total that drives the soft-pass
//! check and the score-only probability table.

use serde::Serialize;

use crate::analyzers::SubScore;
use crate::config::IndicatorConfig;
use crate::indicators::IndicatorSnapshot;
use crate::types::{Direction, Strength};

/// One indicator's opinion. `Undefined` is kept apart from `Neutral` so an
/// under-warmed indicator is visible in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Bullish,
    Bearish,
    Neutral,
    Undefined,
}

impl Vote {
    pub fn value(&self) -> i32 {
        match self {
            Vote::Bullish => 1,
            Vote::Bearish => -1,
            Vote::Neutral | Vote::Undefined => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndicatorVotes {
    pub ema_cross: Vote,
    pub rsi: Vote,
    pub macd: Vote,
    pub adx: Vote,
    pub bollinger: Vote,
    pub volume: Vote,
}

impl IndicatorVotes {
    pub fn from_snapshot(snap: &IndicatorSnapshot, cfg: &IndicatorConfig) -> Self {
        let ema_cross = match (snap.ema_fast, snap.ema_slow) {
            (Some(fast), Some(slow)) if fast > slow => Vote::Bullish,
            (Some(_), Some(_)) => Vote::Bearish,
            _ => Vote::Undefined,
        };

        let rsi = match snap.rsi {
            Some(r) if r < cfg.rsi_oversold => Vote::Bullish,
            Some(r) if r > cfg.rsi_overbought => Vote::Bearish,
            Some(_) => Vote::Neutral,
            None => Vote::Undefined,
        };

        let macd = match (snap.macd, snap.macd_signal) {
            (Some(line), Some(signal)) if line > signal => Vote::Bullish,
            (Some(_), Some(_)) => Vote::Bearish,
            _ => Vote::Undefined,
        };

        let adx = match snap.adx {
            Some(a) if a > cfg.adx_trend => Vote::Bullish,
            Some(_) => Vote::Neutral,
            None => Vote::Undefined,
        };

        let bollinger = match (snap.bb_upper, snap.bb_lower) {
            (_, Some(lower)) if snap.close < lower => Vote::Bullish,
            (Some(upper), _) if snap.close > upper => Vote::Bearish,
            (Some(_), Some(_)) => Vote::Neutral,
            _ => Vote::Undefined,
        };

        let volume = match snap.volume_ma {
            Some(ma) if snap.volume > cfg.volume_spike_mult * ma => Vote::Bullish,
            Some(_) => Vote::Neutral,
            None => Vote::Undefined,
        };

        Self {
            ema_cross,
            rsi,
            macd,
            adx,
            bollinger,
            volume,
        }
    }

    pub fn all(&self) -> [(&'static str, Vote); 6] {
        [
            ("ema_cross", self.ema_cross),
            ("rsi", self.rsi),
            ("macd", self.macd),
            ("adx", self.adx),
            ("bollinger", self.bollinger),
            ("volume", self.volume),
        ]
    }

    pub fn sum(&self) -> i32 {
        self.all().iter().map(|(_, v)| v.value()).sum()
    }

    /// Names of indicators that were not yet warmed up
    pub fn undefined(&self) -> Vec<&'static str> {
        self.all()
            .iter()
            .filter(|(_, v)| *v == Vote::Undefined)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Direction from the indicator vote alone
pub fn direction_from_votes(indicator_score: i32) -> Direction {
    if indicator_score >= 2 {
        Direction::Buy
    } else if indicator_score <= -2 {
        Direction::Sell
    } else {
        Direction::Flat
    }
}

pub fn strength_from_votes(indicator_score: i32) -> Strength {
    match indicator_score.abs() {
        s if s >= 4 => Strength::High,
        3 => Strength::Medium,
        _ => Strength::Low,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeScore {
    pub votes: IndicatorVotes,
    pub indicator_score: i32,
    pub sub_scores: Vec<SubScore>,
    pub analyzer_score: f64,
    pub total_score: f64,
    pub direction: Direction,
    pub strength: Strength,
}

impl CompositeScore {
    pub fn new(snapshot: &IndicatorSnapshot, sub_scores: Vec<SubScore>, cfg: &IndicatorConfig) -> Self {
        let votes = IndicatorVotes::from_snapshot(snapshot, cfg);
        let indicator_score = votes.sum();
        let analyzer_score: f64 = sub_scores.iter().map(|s| s.score).sum();

        Self {
            votes,
            indicator_score,
            sub_scores,
            analyzer_score,
            total_score: indicator_score as f64 + analyzer_score,
            direction: direction_from_votes(indicator_score),
            strength: strength_from_votes(indicator_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{AnalyzerKind, SubScore};

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 100.0,
            ema_fast: Some(101.0),
            ema_slow: Some(99.0),
            rsi: Some(50.0),
            macd: Some(0.5),
            macd_signal: Some(0.2),
            adx: Some(30.0),
            bb_upper: Some(105.0),
            bb_lower: Some(95.0),
            volume: 100.0,
            volume_ma: Some(100.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_votes_follow_fixed_rules() {
        let votes = IndicatorVotes::from_snapshot(&snapshot(), &IndicatorConfig::default());
        assert_eq!(votes.ema_cross, Vote::Bullish);
        assert_eq!(votes.rsi, Vote::Neutral);
        assert_eq!(votes.macd, Vote::Bullish);
        assert_eq!(votes.adx, Vote::Bullish);
        assert_eq!(votes.bollinger, Vote::Neutral);
        assert_eq!(votes.volume, Vote::Neutral);
        assert_eq!(votes.sum(), 3);
    }

    #[test]
    fn test_bearish_extremes() {
        let snap = IndicatorSnapshot {
            close: 110.0,
            ema_fast: Some(98.0),
            rsi: Some(75.0),
            macd: Some(-0.1),
            adx: Some(10.0),
            ..snapshot()
        };
        let votes = IndicatorVotes::from_snapshot(&snap, &IndicatorConfig::default());
        assert_eq!(votes.bollinger, Vote::Bearish);
        assert_eq!(votes.sum(), -4);
        assert_eq!(direction_from_votes(votes.sum()), Direction::Sell);
        assert_eq!(strength_from_votes(votes.sum()), Strength::High);
    }

    #[test]
    fn test_undefined_votes_are_reported_not_neutral() {
        let snap = IndicatorSnapshot {
            rsi: None,
            volume_ma: None,
            ..snapshot()
        };
        let votes = IndicatorVotes::from_snapshot(&snap, &IndicatorConfig::default());
        assert_eq!(votes.rsi, Vote::Undefined);
        assert_eq!(votes.undefined(), vec!["rsi", "volume"]);
    }

    #[test]
    fn test_direction_uses_indicator_score_only() {
        let subs = vec![SubScore::new(
            AnalyzerKind::Volatility,
            4.0,
            crate::analyzers::SubScoreDetail::empty(AnalyzerKind::Volatility),
        )];
        let snap = IndicatorSnapshot {
            ema_fast: Some(98.0),
            macd: Some(0.1),
            adx: Some(10.0),
            ..snapshot()
        };
        // ema and macd both bearish
        let composite = CompositeScore::new(&snap, subs, &IndicatorConfig::default());
        assert_eq!(composite.indicator_score, -2);
        assert_eq!(composite.total_score, 2.0);
        assert_eq!(composite.direction, Direction::Sell);
        assert_eq!(composite.strength, Strength::Low);
    }

    #[test]
    fn test_strength_tiers() {
        assert_eq!(strength_from_votes(2), Strength::Low);
        assert_eq!(strength_from_votes(-3), Strength::Medium);
        assert_eq!(strength_from_votes(5), Strength::High);
        assert_eq!(direction_from_votes(1), Direction::Flat);
    }
}
