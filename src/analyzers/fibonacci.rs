//! Fibonacci retracement proximity

use serde::Serialize;

use super::{require_bars, AnalysisError, Analyzer, AnalyzerKind, SubScore, SubScoreDetail};
use crate::types::Bar;

pub const RETRACEMENTS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FibonacciDetail {
    pub high: f64,
    pub low: f64,
    /// (ratio, price), measured down from the high
    pub levels: Vec<(f64, f64)>,
    pub level_hit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FibonacciAnalyzer {
    pub lookback: usize,
    /// Fraction of the high-low range
    pub tolerance: f64,
}

impl Default for FibonacciAnalyzer {
    fn default() -> Self {
        Self {
            lookback: 100,
            tolerance: 0.015,
        }
    }
}

impl Analyzer for FibonacciAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Fibonacci
    }

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError> {
        require_bars(bars, 1)?;
        let recent = &bars[bars.len().saturating_sub(self.lookback)..];

        let high = recent.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = recent.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let diff = high - low;

        let levels: Vec<(f64, f64)> = RETRACEMENTS.iter().map(|&r| (r, high - r * diff)).collect();

        // a flat window has every level on top of the close
        if diff <= 0.0 {
            return Ok(SubScore::new(
                AnalyzerKind::Fibonacci,
                0.0,
                SubScoreDetail::Fibonacci(FibonacciDetail {
                    high,
                    low,
                    levels,
                    level_hit: None,
                }),
            ));
        }

        let close = bars[bars.len() - 1].close;
        let tolerance = diff * self.tolerance;
        let level_hit = levels
            .iter()
            .find(|(_, price)| (close - price).abs() <= tolerance)
            .map(|&(ratio, _)| ratio);

        Ok(SubScore::new(
            AnalyzerKind::Fibonacci,
            if level_hit.is_some() { 1.0 } else { 0.0 },
            SubScoreDetail::Fibonacci(FibonacciDetail {
                high,
                low,
                levels,
                level_hit,
            }),
        ))
    }
}
