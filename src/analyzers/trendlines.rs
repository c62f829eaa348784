//! Regression trend and support/resistance levels

use serde::Serialize;

use super::{linear_regression, require_bars, AnalysisError, Analyzer, AnalyzerKind, SubScore, SubScoreDetail};
use crate::types::{Bar, Strength};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendlineDetail {
    pub slope: f64,
    pub r_squared: f64,
    /// |slope| * r
    pub strength: f64,
    pub rising: bool,
    pub levels: Vec<f64>,
    pub confidence: Strength,
}

#[derive(Debug, Clone)]
pub struct TrendlineAnalyzer {
    pub min_bars: usize,
    pub regression_window: usize,
    /// Slope (price units per bar) beyond which the trend scores
    pub slope_threshold: f64,
    pub level_window: usize,
    pub level_tolerance: f64,
    pub max_levels: usize,
}

impl Default for TrendlineAnalyzer {
    fn default() -> Self {
        Self {
            min_bars: 60,
            regression_window: 50,
            slope_threshold: 0.2,
            level_window: 20,
            level_tolerance: 0.003,
            max_levels: 5,
        }
    }
}

impl TrendlineAnalyzer {
    /// Local extremes that dominate `level_window` bars on both sides,
    /// reported as the bar's mid price and de-duplicated by relative tolerance.
    pub fn support_resistance(&self, bars: &[Bar]) -> Vec<f64> {
        let w = self.level_window;
        let mut levels: Vec<f64> = Vec::new();
        if bars.len() <= 2 * w {
            return levels;
        }

        for i in w..bars.len() - w {
            let high = bars[i].high;
            let low = bars[i].low;
            let neighbours = (1..=w).flat_map(|j| [&bars[i - j], &bars[i + j]]);

            let mut is_resistance = true;
            let mut is_support = true;
            for other in neighbours {
                is_resistance &= high >= other.high;
                is_support &= low <= other.low;
            }

            if is_support || is_resistance {
                let level = (high + low) / 2.0;
                if levels.iter().all(|l| (level - l).abs() > level * self.level_tolerance) {
                    levels.push(level);
                }
            }
        }

        levels.truncate(self.max_levels);
        levels
    }
}

impl Analyzer for TrendlineAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Trendlines
    }

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError> {
        require_bars(bars, self.min_bars)?;

        let start = bars.len().saturating_sub(self.regression_window);
        let closes: Vec<f64> = bars[start..].iter().map(|b| b.close).collect();
        let reg = linear_regression(&closes).ok_or(AnalysisError::Degenerate("regression window too short"))?;

        let score = if reg.slope > self.slope_threshold {
            1.0
        } else if reg.slope < -self.slope_threshold {
            -1.0
        } else {
            0.0
        };

        let confidence = if reg.slope.abs() > 2.0 * self.slope_threshold {
            Strength::High
        } else if reg.slope.abs() > self.slope_threshold {
            Strength::Medium
        } else {
            Strength::Low
        };

        Ok(SubScore::new(
            AnalyzerKind::Trendlines,
            score,
            SubScoreDetail::Trendlines(TrendlineDetail {
                slope: reg.slope,
                r_squared: reg.r * reg.r,
                strength: reg.slope.abs() * reg.r,
                rising: reg.slope > 0.0,
                levels: self.support_resistance(bars),
                confidence,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new_unchecked(start + Duration::hours(i as i64), c, c + 0.5, c - 0.5, c, 10.0))
            .collect()
    }

    #[test]
    fn test_rising_trend_scores_positive() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + 0.5 * i as f64).collect();
        let sub = TrendlineAnalyzer::default().analyze(&series(&closes)).unwrap();
        assert_eq!(sub.score, 1.0);
        let SubScoreDetail::Trendlines(detail) = sub.detail else {
            panic!("wrong detail variant");
        };
        assert!(detail.rising);
        assert!((detail.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(detail.confidence, Strength::High);
    }

    #[test]
    fn test_small_slope_is_neutral() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 - 0.1 * i as f64).collect();
        let sub = TrendlineAnalyzer::default().analyze(&series(&closes)).unwrap();
        assert_eq!(sub.score, 0.0);
    }

    #[test]
    fn test_requires_sixty_bars() {
        let closes = vec![100.0; 59];
        assert!(matches!(
            TrendlineAnalyzer::default().analyze(&series(&closes)),
            Err(AnalysisError::InsufficientData { required: 60, provided: 59 })
        ));
    }

    #[test]
    fn test_support_resistance_finds_isolated_peak() {
        let mut closes = vec![100.0; 61];
        closes[30] = 110.0;
        let bars = series(&closes);
        let analyzer = TrendlineAnalyzer {
            max_levels: 10,
            ..TrendlineAnalyzer::default()
        };
        let levels = analyzer.support_resistance(&bars);
        // the peak is a resistance; flat neighbours qualify as support at 100
        assert!(levels.contains(&110.0));
        assert!(levels.contains(&100.0));
        assert_eq!(levels.len(), 2);
    }
}
