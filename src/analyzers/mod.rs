//! Sub-analyzers
//!
//! Independent heuristic scorers run on the same bar series as the indicator
//! vote. Each one returns a typed [`SubScore`]; the set of analyzers is closed
//! ([`AnalyzerKind`]) so a failed analyzer is replaced by a zero-valued score
//! of its own kind instead of disappearing from the breakdown.

pub mod candles;
pub mod chart_patterns;
pub mod fibonacci;
pub mod seasonality;
pub mod trendlines;
pub mod volatility;
pub mod volume_profile;

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::Bar;

pub use candles::{CandleAnalyzer, CandleDetail, CandlePattern};
pub use chart_patterns::{ChartPattern, ChartPatternAnalyzer, ChartPatternDetail, PatternKind};
pub use fibonacci::{FibonacciAnalyzer, FibonacciDetail};
pub use seasonality::{SeasonalityAnalyzer, SeasonalityDetail};
pub use trendlines::{TrendlineAnalyzer, TrendlineDetail};
pub use volatility::{VolatilityAnalyzer, VolatilityDetail};
pub use volume_profile::{VolumeNode, VolumeProfileAnalyzer, VolumeProfileDetail};

/// Why an analyzer could not produce a score
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("insufficient data: need {required} bars, got {provided}")]
    InsufficientData { required: usize, provided: usize },

    #[error("degenerate input: {0}")]
    Degenerate(&'static str),
}

/// The closed set of sub-analyzers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Candles,
    Trendlines,
    Volatility,
    Fibonacci,
    VolumeProfile,
    ChartPatterns,
    Seasonality,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 7] = [
        AnalyzerKind::Candles,
        AnalyzerKind::Trendlines,
        AnalyzerKind::Volatility,
        AnalyzerKind::Fibonacci,
        AnalyzerKind::VolumeProfile,
        AnalyzerKind::ChartPatterns,
        AnalyzerKind::Seasonality,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerKind::Candles => "candles",
            AnalyzerKind::Trendlines => "trendlines",
            AnalyzerKind::Volatility => "volatility",
            AnalyzerKind::Fibonacci => "fibonacci",
            AnalyzerKind::VolumeProfile => "volume_profile",
            AnalyzerKind::ChartPatterns => "chart_patterns",
            AnalyzerKind::Seasonality => "seasonality",
        }
    }

    /// Analyzer with default parameters
    pub fn build(&self) -> Box<dyn Analyzer> {
        match self {
            AnalyzerKind::Candles => Box::new(CandleAnalyzer),
            AnalyzerKind::Trendlines => Box::new(TrendlineAnalyzer::default()),
            AnalyzerKind::Volatility => Box::new(VolatilityAnalyzer::default()),
            AnalyzerKind::Fibonacci => Box::new(FibonacciAnalyzer::default()),
            AnalyzerKind::VolumeProfile => Box::new(VolumeProfileAnalyzer::default()),
            AnalyzerKind::ChartPatterns => Box::new(ChartPatternAnalyzer::default()),
            AnalyzerKind::Seasonality => Box::new(SeasonalityAnalyzer::default()),
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed diagnostic payload, one variant per analyzer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "analyzer", rename_all = "snake_case")]
pub enum SubScoreDetail {
    Candles(CandleDetail),
    Trendlines(TrendlineDetail),
    Volatility(VolatilityDetail),
    Fibonacci(FibonacciDetail),
    VolumeProfile(VolumeProfileDetail),
    ChartPatterns(ChartPatternDetail),
    Seasonality(SeasonalityDetail),
}

impl SubScoreDetail {
    /// Zero-valued payload for `kind`
    pub fn empty(kind: AnalyzerKind) -> Self {
        match kind {
            AnalyzerKind::Candles => SubScoreDetail::Candles(CandleDetail::default()),
            AnalyzerKind::Trendlines => SubScoreDetail::Trendlines(TrendlineDetail::default()),
            AnalyzerKind::Volatility => SubScoreDetail::Volatility(VolatilityDetail::default()),
            AnalyzerKind::Fibonacci => SubScoreDetail::Fibonacci(FibonacciDetail::default()),
            AnalyzerKind::VolumeProfile => SubScoreDetail::VolumeProfile(VolumeProfileDetail::default()),
            AnalyzerKind::ChartPatterns => SubScoreDetail::ChartPatterns(ChartPatternDetail::default()),
            AnalyzerKind::Seasonality => SubScoreDetail::Seasonality(SeasonalityDetail::default()),
        }
    }
}

/// One analyzer's contribution to the composite score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubScore {
    pub kind: AnalyzerKind,
    pub score: f64,
    pub detail: SubScoreDetail,
    /// Set when the analyzer failed and this is a zero-valued stand-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl SubScore {
    pub fn new(kind: AnalyzerKind, score: f64, detail: SubScoreDetail) -> Self {
        Self {
            kind,
            score,
            detail,
            fault: None,
        }
    }

    pub fn zero(kind: AnalyzerKind) -> Self {
        Self::new(kind, 0.0, SubScoreDetail::empty(kind))
    }

    pub fn failed(kind: AnalyzerKind, error: &AnalysisError) -> Self {
        Self {
            fault: Some(error.to_string()),
            ..Self::zero(kind)
        }
    }
}

/// A heuristic scorer over a bar series
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError>;
}

/// All analyzers with default parameters, in breakdown order
pub fn default_analyzers() -> Vec<Box<dyn Analyzer>> {
    AnalyzerKind::ALL.iter().map(|k| k.build()).collect()
}

/// Run every analyzer; a failure contributes a zero score of the same kind.
pub fn run_all(analyzers: &[Box<dyn Analyzer>], bars: &[Bar]) -> Vec<SubScore> {
    analyzers
        .iter()
        .map(|analyzer| {
            let kind = analyzer.kind();
            match analyzer.analyze(bars) {
                Ok(sub) if sub.score.is_finite() => sub,
                Ok(_) => {
                    let err = AnalysisError::Degenerate("non-finite score");
                    warn!(analyzer = %kind, "{}", err);
                    SubScore::failed(kind, &err)
                }
                Err(err @ AnalysisError::InsufficientData { .. }) => {
                    debug!(analyzer = %kind, "{}", err);
                    SubScore::failed(kind, &err)
                }
                Err(err) => {
                    warn!(analyzer = %kind, "analyzer failed: {}", err);
                    SubScore::failed(kind, &err)
                }
            }
        })
        .collect()
}

pub(crate) fn require_bars(bars: &[Bar], required: usize) -> Result<(), AnalysisError> {
    if bars.len() < required {
        return Err(AnalysisError::InsufficientData {
            required,
            provided: bars.len(),
        });
    }
    Ok(())
}

// =============================================================================
// Shared numeric helpers
// =============================================================================

/// Least-squares fit of `y` against 0..n
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Regression {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation; 0 when either variance is zero
    pub r: f64,
}

pub(crate) fn linear_regression(y: &[f64]) -> Option<Regression> {
    let n = y.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = y.iter().sum::<f64>() / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, &v) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = v - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let slope = sxy / sxx;
    let r = if syy > 0.0 { sxy / (sxx * syy).sqrt() } else { 0.0 };

    Some(Regression {
        slope,
        intercept: y_mean - slope * x_mean,
        r,
    })
}

/// Index of the first maximum
pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Index of the first minimum
pub(crate) fn argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v >= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Failing;

    impl Analyzer for Failing {
        fn kind(&self) -> AnalyzerKind {
            AnalyzerKind::Fibonacci
        }

        fn analyze(&self, _bars: &[Bar]) -> Result<SubScore, AnalysisError> {
            Err(AnalysisError::Degenerate("boom"))
        }
    }

    #[test]
    fn test_failed_analyzer_defaults_to_zero_of_same_kind() {
        let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(Failing)];
        let scores = run_all(&analyzers, &[]);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].kind, AnalyzerKind::Fibonacci);
        assert_eq!(scores[0].score, 0.0);
        assert!(matches!(scores[0].detail, SubScoreDetail::Fibonacci(_)));
        assert_eq!(scores[0].fault.as_deref(), Some("degenerate input: boom"));
    }

    #[test]
    fn test_every_kind_produces_a_score_on_empty_input() {
        let scores = run_all(&default_analyzers(), &[]);
        let kinds: Vec<_> = scores.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, AnalyzerKind::ALL.to_vec());
        assert!(scores.iter().all(|s| s.score == 0.0));
    }

    #[test]
    fn test_linear_regression() {
        let y: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        let reg = linear_regression(&y).unwrap();
        assert_relative_eq!(reg.slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(reg.intercept, 3.0, epsilon = 1e-12);
        assert_relative_eq!(reg.r, 1.0, epsilon = 1e-12);

        let flat = linear_regression(&[5.0; 8]).unwrap();
        assert_eq!(flat.slope, 0.0);
        assert_eq!(flat.r, 0.0);
        assert!(linear_regression(&[1.0]).is_none());
    }

    #[test]
    fn test_argmax_argmin_first_occurrence() {
        let v = [1.0, 3.0, 3.0, 0.0, 0.0];
        assert_eq!(argmax(&v), Some(1));
        assert_eq!(argmin(&v), Some(3));
        assert_eq!(argmax(&[]), None);
    }
}
