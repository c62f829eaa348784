//! Classical chart formations from regression slopes and swing points

use serde::Serialize;

use super::{argmax, argmin, linear_regression, require_bars, AnalysisError, Analyzer, AnalyzerKind, SubScore, SubScoreDetail};
use crate::types::{Bar, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Channel,
    Triangle,
    Flag,
    HeadAndShoulders,
    InverseHeadAndShoulders,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPattern {
    pub kind: PatternKind,
    /// Flat for formations without a bias
    pub trend: Direction,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartPatternDetail {
    pub patterns: Vec<ChartPattern>,
}

#[derive(Debug, Clone)]
pub struct ChartPatternAnalyzer {
    pub lookback: usize,
    pub channel_threshold: f64,
    pub triangle_tolerance: f64,
    pub flag_min_change: f64,
    pub shoulders_lookback: usize,
}

impl Default for ChartPatternAnalyzer {
    fn default() -> Self {
        Self {
            lookback: 30,
            channel_threshold: 0.01,
            triangle_tolerance: 0.02,
            flag_min_change: 0.03,
            shoulders_lookback: 50,
        }
    }
}

struct Slopes {
    high: f64,
    low: f64,
}

impl ChartPatternAnalyzer {
    fn slopes(&self, window: &[Bar]) -> Option<Slopes> {
        let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = window.iter().map(|b| b.low).collect();
        Some(Slopes {
            high: linear_regression(&highs)?.slope,
            low: linear_regression(&lows)?.slope,
        })
    }

    fn channel(&self, s: &Slopes) -> Option<ChartPattern> {
        if (s.high - s.low).abs() >= self.channel_threshold {
            return None;
        }
        let trend = if (s.high + s.low) / 2.0 > 0.0 {
            Direction::Buy
        } else {
            Direction::Sell
        };
        Some(ChartPattern {
            kind: PatternKind::Channel,
            trend,
            weight: 2.0,
        })
    }

    /// Symmetric triangle: converging highs and lows.
    fn triangle(&self, s: &Slopes) -> Option<ChartPattern> {
        (s.high < 0.0 && s.low > 0.0 && (s.high - s.low).abs() < self.triangle_tolerance).then_some(ChartPattern {
            kind: PatternKind::Triangle,
            trend: Direction::Flat,
            weight: 2.0,
        })
    }

    fn flag(&self, window: &[Bar], s: &Slopes) -> Option<ChartPattern> {
        let first = window.first()?.close;
        let last = window.last()?.close;
        if first == 0.0 || (last / first - 1.0).abs() <= self.flag_min_change {
            return None;
        }
        if s.high * s.low <= 0.0 {
            return None;
        }
        let trend = if s.high > 0.0 { Direction::Buy } else { Direction::Sell };
        Some(ChartPattern {
            kind: PatternKind::Flag,
            trend,
            weight: 2.0,
        })
    }

    /// Left shoulder in the first third, a swing in the first half, the
    /// other shoulder afterwards. The inverse form mirrors the search.
    fn head_and_shoulders(&self, closes: &[f64]) -> Option<ChartPattern> {
        let n = closes.len();
        if n < 7 {
            return None;
        }

        let peak1 = argmax(&closes[..n / 3])?;
        let valley = argmin(&closes[peak1..n / 2])? + peak1;
        let peak2 = argmax(&closes[valley..])? + valley;
        if peak1 < valley
            && valley < peak2
            && closes[peak1] > closes[peak2]
            && closes[valley] < closes[peak1].min(closes[peak2])
        {
            return Some(ChartPattern {
                kind: PatternKind::HeadAndShoulders,
                trend: Direction::Sell,
                weight: 3.0,
            });
        }

        let trough1 = argmin(&closes[..n / 3])?;
        let crest = argmax(&closes[trough1..n / 2])? + trough1;
        let trough2 = argmin(&closes[crest..])? + crest;
        if trough1 < crest
            && crest < trough2
            && closes[trough1] < closes[trough2]
            && closes[crest] > closes[trough1].max(closes[trough2])
        {
            return Some(ChartPattern {
                kind: PatternKind::InverseHeadAndShoulders,
                trend: Direction::Buy,
                weight: 3.0,
            });
        }

        None
    }

    pub fn detect(&self, bars: &[Bar]) -> Result<Vec<ChartPattern>, AnalysisError> {
        require_bars(bars, self.lookback)?;
        let window = &bars[bars.len() - self.lookback..];
        let slopes = self
            .slopes(window)
            .ok_or(AnalysisError::Degenerate("pattern window too short"))?;

        let mut patterns: Vec<ChartPattern> = [
            self.channel(&slopes),
            self.triangle(&slopes),
            self.flag(window, &slopes),
        ]
        .into_iter()
        .flatten()
        .collect();

        if bars.len() >= self.shoulders_lookback {
            let closes: Vec<f64> = bars[bars.len() - self.shoulders_lookback..]
                .iter()
                .map(|b| b.close)
                .collect();
            patterns.extend(self.head_and_shoulders(&closes));
        }

        Ok(patterns)
    }
}

impl Analyzer for ChartPatternAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::ChartPatterns
    }

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError> {
        let patterns = self.detect(bars)?;
        let score = if patterns.is_empty() { 0.0 } else { 1.0 };
        Ok(SubScore::new(
            AnalyzerKind::ChartPatterns,
            score,
            SubScoreDetail::ChartPatterns(ChartPatternDetail { patterns }),
        ))
    }
}
