//! Volatility expansion score

use serde::Serialize;
use statrs::statistics::Statistics;

use super::{require_bars, AnalysisError, Analyzer, AnalyzerKind, SubScore, SubScoreDetail};
use crate::indicators::{rolling_mean, rolling_std, true_range};
use crate::types::{Bar, Columns};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolatilityDetail {
    pub atr: Option<f64>,
    pub std_dev: Option<f64>,
    pub volume_spike: bool,
    pub cluster: bool,
}

#[derive(Debug, Clone)]
pub struct VolatilityAnalyzer {
    pub min_bars: usize,
    pub atr_period: usize,
    pub std_period: usize,
    pub volume_period: usize,
    pub volume_spike_mult: f64,
    /// Recent true ranges inspected for a cluster
    pub cluster_window: usize,
    pub cluster_min: usize,
}

impl Default for VolatilityAnalyzer {
    fn default() -> Self {
        Self {
            min_bars: 20,
            atr_period: 14,
            std_period: 14,
            volume_period: 20,
            volume_spike_mult: 1.5,
            cluster_window: 5,
            cluster_min: 3,
        }
    }
}

/// Last value and whether it exceeds the mean of all defined values.
fn last_above_mean(series: &[Option<f64>]) -> (Option<f64>, bool) {
    let last = series.last().copied().flatten();
    let defined: Vec<f64> = series.iter().flatten().copied().collect();
    let mean = defined.iter().mean();
    let above = matches!(last, Some(v) if mean.is_finite() && v > mean);
    (last, above)
}

impl Analyzer for VolatilityAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Volatility
    }

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError> {
        require_bars(bars, self.min_bars)?;
        let cols = Columns::from_bars(bars);

        let tr = true_range(&cols.high, &cols.low, &cols.close);
        let atr_series = rolling_mean(&tr, self.atr_period, self.atr_period);
        let (atr, atr_expanding) = last_above_mean(&atr_series);

        let std_series = rolling_std(&cols.close, self.std_period);
        let (std_dev, std_expanding) = last_above_mean(&std_series);

        let volume_ma = rolling_mean(&cols.volume, self.volume_period, self.volume_period);
        let last_volume = cols.volume[cols.volume.len() - 1];
        let volume_spike = matches!(
            volume_ma.last().copied().flatten(),
            Some(ma) if ma > 0.0 && last_volume / ma > self.volume_spike_mult
        );

        let recent = &tr[tr.len().saturating_sub(self.cluster_window)..];
        let recent_mean = recent.iter().mean();
        let cluster = recent.iter().filter(|&&r| r > recent_mean).count() >= self.cluster_min;

        let score = [
            atr_expanding && atr.is_some_and(|a| a > 0.0),
            std_expanding,
            volume_spike,
            cluster,
        ]
        .iter()
        .filter(|&&hit| hit)
        .count() as f64;

        Ok(SubScore::new(
            AnalyzerKind::Volatility,
            score,
            SubScoreDetail::Volatility(VolatilityDetail {
                atr,
                std_dev,
                volume_spike,
                cluster,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_with_ranges(ranges: &[f64], volumes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ranges
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&r, &v))| {
                let c = 100.0 + (i % 2) as f64 * r * 0.2;
                Bar::new_unchecked(start + Duration::hours(i as i64), c, c + r / 2.0, c - r / 2.0, c, v)
            })
            .collect()
    }

    #[test]
    fn test_quiet_series_scores_zero() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..40)
            .map(|i| Bar::new_unchecked(start + Duration::hours(i), 100.0, 100.5, 99.5, 100.0, 100.0))
            .collect();
        let sub = VolatilityAnalyzer::default().analyze(&bars).unwrap();
        assert_eq!(sub.score, 0.0);
    }

    #[test]
    fn test_expansion_scores_every_component() {
        let mut ranges = vec![1.0; 40];
        for r in ranges.iter_mut().skip(35) {
            *r = 6.0;
        }
        let mut volumes = vec![100.0; 40];
        volumes[39] = 400.0;
        let bars = bars_with_ranges(&ranges, &volumes);

        let sub = VolatilityAnalyzer::default().analyze(&bars).unwrap();
        let SubScoreDetail::Volatility(detail) = &sub.detail else {
            panic!("wrong detail variant");
        };
        assert!(detail.volume_spike);
        assert!(!detail.cluster, "five equal wide bars are not above their own mean");
        assert_eq!(sub.score, 3.0);
    }

    #[test]
    fn test_cluster_detection() {
        let mut ranges = vec![1.0; 30];
        ranges[26] = 5.0;
        ranges[27] = 5.0;
        ranges[28] = 5.0;
        let bars = bars_with_ranges(&ranges, &[100.0; 30]);
        let sub = VolatilityAnalyzer::default().analyze(&bars).unwrap();
        let SubScoreDetail::Volatility(detail) = &sub.detail else {
            panic!("wrong detail variant");
        };
        assert!(detail.cluster);
    }

    #[test]
    fn test_requires_twenty_bars() {
        let bars = bars_with_ranges(&[1.0; 19], &[1.0; 19]);
        assert!(VolatilityAnalyzer::default().analyze(&bars).is_err());
    }
}
