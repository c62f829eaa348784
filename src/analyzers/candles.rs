//! Candlestick patterns on the last one to three bars

use serde::Serialize;

use super::{require_bars, AnalysisError, Analyzer, AnalyzerKind, SubScore, SubScoreDetail};
use crate::types::{Bar, Strength};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    Doji,
    Hammer,
    ShootingStar,
    BullishMarubozu,
    BearishMarubozu,
    BullishEngulfing,
    BearishEngulfing,
    MorningStar,
    EveningStar,
}

impl CandlePattern {
    pub fn score(&self) -> f64 {
        match self {
            CandlePattern::Hammer
            | CandlePattern::BullishMarubozu
            | CandlePattern::BullishEngulfing
            | CandlePattern::MorningStar => 1.0,
            CandlePattern::ShootingStar
            | CandlePattern::BearishMarubozu
            | CandlePattern::BearishEngulfing
            | CandlePattern::EveningStar => -1.0,
            CandlePattern::Doji => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandleDetail {
    pub single: Option<CandlePattern>,
    pub sequential: Vec<CandlePattern>,
    pub confidence: Strength,
}

/// Classify one bar by body/shadow proportions.
pub fn classify_bar(bar: &Bar) -> Option<CandlePattern> {
    let body = bar.body();
    let range = bar.range();
    if range == 0.0 {
        return Some(CandlePattern::Doji);
    }

    let upper_shadow = bar.high - bar.close.max(bar.open);
    let lower_shadow = bar.close.min(bar.open) - bar.low;

    if body < range * 0.2 {
        if upper_shadow > body * 2.0 && lower_shadow < body * 0.5 {
            return Some(CandlePattern::ShootingStar);
        }
        if lower_shadow > body * 2.0 && upper_shadow < body * 0.5 {
            return Some(CandlePattern::Hammer);
        }
        return Some(CandlePattern::Doji);
    }

    if body > range * 0.6 {
        if bar.close > bar.open {
            return Some(CandlePattern::BullishMarubozu);
        }
        if bar.close < bar.open {
            return Some(CandlePattern::BearishMarubozu);
        }
    }

    None
}

/// Two- and three-bar reversal patterns ending at the last bar.
pub fn sequential_patterns(bars: &[Bar]) -> Vec<CandlePattern> {
    let [b2, b1, b0] = match bars {
        [.., a, b, c] => [a, b, c],
        _ => return Vec::new(),
    };
    let (o0, c0) = (b0.open, b0.close);
    let (o1, c1) = (b1.open, b1.close);
    let (o2, c2) = (b2.open, b2.close);

    let mut patterns = Vec::new();

    if c1 > o1 && c0 < o0 && o0 > c1 && c0 < o1 {
        patterns.push(CandlePattern::BearishEngulfing);
    } else if c1 < o1 && c0 > o0 && o0 < c1 && c0 > o1 {
        patterns.push(CandlePattern::BullishEngulfing);
    }

    let small_middle = b1.body() < b2.body() * 0.3;
    let first_mid = (o2 + c2) / 2.0;
    if c2 < o2 && small_middle && c0 > o0 && c0 > first_mid {
        patterns.push(CandlePattern::MorningStar);
    } else if c2 > o2 && small_middle && c0 < o0 && c0 < first_mid {
        patterns.push(CandlePattern::EveningStar);
    }

    patterns
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CandleAnalyzer;

impl Analyzer for CandleAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Candles
    }

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError> {
        require_bars(bars, 1)?;
        let last = &bars[bars.len() - 1];

        let single = classify_bar(last);
        let sequential = sequential_patterns(bars);
        let score = single.map_or(0.0, |p| p.score()) + sequential.iter().map(|p| p.score()).sum::<f64>();

        let confidence = match score.abs() {
            s if s >= 2.0 => Strength::High,
            s if s >= 1.0 => Strength::Medium,
            _ => Strength::Low,
        };

        Ok(SubScore::new(
            AnalyzerKind::Candles,
            score,
            SubScoreDetail::Candles(CandleDetail {
                single,
                sequential,
                confidence,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i);
        Bar::new_unchecked(ts, o, h, l, c, 1.0)
    }

    #[test]
    fn test_single_patterns() {
        assert_eq!(classify_bar(&bar(0, 10.0, 10.0, 10.0, 10.0)), Some(CandlePattern::Doji));
        // small body at the top, long lower wick
        assert_eq!(classify_bar(&bar(0, 9.95, 10.0, 8.0, 10.0)), Some(CandlePattern::Hammer));
        // small body at the bottom, long upper wick
        assert_eq!(classify_bar(&bar(0, 8.05, 10.0, 8.0, 8.0)), Some(CandlePattern::ShootingStar));
        assert_eq!(classify_bar(&bar(0, 8.1, 10.0, 8.0, 9.9)), Some(CandlePattern::BullishMarubozu));
        assert_eq!(classify_bar(&bar(0, 9.9, 10.0, 8.0, 8.1)), Some(CandlePattern::BearishMarubozu));
        // mid-sized body: nothing
        assert_eq!(classify_bar(&bar(0, 8.5, 10.0, 8.0, 9.3)), None);
    }

    #[test]
    fn test_bullish_engulfing() {
        let bars = vec![
            bar(0, 10.0, 10.5, 9.5, 10.0),
            bar(1, 10.0, 10.1, 9.4, 9.5),
            bar(2, 9.4, 10.4, 9.3, 10.3),
        ];
        assert_eq!(sequential_patterns(&bars), vec![CandlePattern::BullishEngulfing]);
    }

    #[test]
    fn test_morning_star() {
        let bars = vec![
            bar(0, 11.0, 11.1, 9.9, 10.0),
            bar(1, 9.95, 10.0, 9.8, 9.9),
            bar(2, 9.9, 10.8, 9.85, 10.7),
        ];
        let patterns = sequential_patterns(&bars);
        assert!(patterns.contains(&CandlePattern::MorningStar));
    }

    #[test]
    fn test_score_combines_single_and_sequential() {
        let bars = vec![
            bar(0, 10.0, 10.5, 9.5, 10.0),
            bar(1, 10.0, 10.1, 9.4, 9.5),
            bar(2, 9.4, 10.4, 9.35, 10.35),
        ];
        let sub = CandleAnalyzer.analyze(&bars).unwrap();
        // bullish marubozu + bullish engulfing
        assert_eq!(sub.score, 2.0);
        match sub.detail {
            SubScoreDetail::Candles(d) => assert_eq!(d.confidence, Strength::High),
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn test_empty_series_is_insufficient() {
        assert!(matches!(
            CandleAnalyzer.analyze(&[]),
            Err(AnalysisError::InsufficientData { required: 1, provided: 0 })
        ));
    }
}
