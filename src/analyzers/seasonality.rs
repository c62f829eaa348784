//! Calendar seasonality of bar returns

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use super::{require_bars, AnalysisError, Analyzer, AnalyzerKind, SubScore, SubScoreDetail};
use crate::types::Bar;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeasonalityDetail {
    /// 1..=12
    pub month: u32,
    /// Monday = 0
    pub weekday: u32,
    pub month_avg_return: f64,
    pub weekday_avg_return: f64,
}

#[derive(Debug, Clone)]
pub struct SeasonalityAnalyzer {
    /// Mean monthly return (%) that counts as seasonal
    pub month_threshold: f64,
    pub weekday_threshold: f64,
    pub component_weight: f64,
}

impl Default for SeasonalityAnalyzer {
    fn default() -> Self {
        Self {
            month_threshold: 0.2,
            weekday_threshold: 0.1,
            component_weight: 0.5,
        }
    }
}

/// Mean percentage return per calendar key; each return belongs to the bar it ends on.
pub fn average_returns<K: Ord>(bars: &[Bar], key: impl Fn(&Bar) -> K) -> BTreeMap<K, f64> {
    let mut sums: BTreeMap<K, (f64, usize)> = BTreeMap::new();
    for pair in bars.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if prev.close == 0.0 {
            continue;
        }
        let ret = (cur.close / prev.close - 1.0) * 100.0;
        let entry = sums.entry(key(cur)).or_insert((0.0, 0));
        entry.0 += ret;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(k, (sum, count))| (k, sum / count as f64))
        .collect()
}

impl SeasonalityAnalyzer {
    fn component(&self, avg: f64, threshold: f64) -> f64 {
        if avg > threshold {
            self.component_weight
        } else if avg < -threshold {
            -self.component_weight
        } else {
            0.0
        }
    }
}

impl Analyzer for SeasonalityAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Seasonality
    }

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError> {
        require_bars(bars, 2)?;
        let now = bars[bars.len() - 1].timestamp;
        let month = now.month();
        let weekday = now.weekday().num_days_from_monday();

        let month_avg_return = average_returns(bars, |b| b.timestamp.month())
            .get(&month)
            .copied()
            .unwrap_or(0.0);
        let weekday_avg_return = average_returns(bars, |b| b.timestamp.weekday().num_days_from_monday())
            .get(&weekday)
            .copied()
            .unwrap_or(0.0);

        let score = self.component(month_avg_return, self.month_threshold)
            + self.component(weekday_avg_return, self.weekday_threshold);

        Ok(SubScore::new(
            AnalyzerKind::Seasonality,
            score,
            SubScoreDetail::Seasonality(SeasonalityDetail {
                month,
                weekday,
                month_avg_return,
                weekday_avg_return,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn daily(closes: &[f64]) -> Vec<Bar> {
        // 2024-01-01 is a Monday
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new_unchecked(start + Duration::days(i as i64), c, c, c, c, 1.0))
            .collect()
    }

    #[test]
    fn test_steady_gain_scores_both_components() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let sub = SeasonalityAnalyzer::default().analyze(&daily(&closes)).unwrap();
        let SubScoreDetail::Seasonality(detail) = &sub.detail else {
            panic!("wrong detail variant");
        };
        assert_eq!(detail.month, 1);
        // day 19 is a Saturday
        assert_eq!(detail.weekday, 5);
        assert_relative_eq!(detail.month_avg_return, 1.0, epsilon = 1e-9);
        assert_eq!(sub.score, 1.0);
    }

    #[test]
    fn test_flat_prices_score_zero() {
        let sub = SeasonalityAnalyzer::default().analyze(&daily(&[50.0; 15])).unwrap();
        assert_eq!(sub.score, 0.0);
    }

    #[test]
    fn test_average_returns_by_weekday() {
        // Mon 100, Tue 110 (+10%), Wed 99 (-10%)
        let bars = daily(&[100.0, 110.0, 99.0]);
        let by_day = average_returns(&bars, |b| b.timestamp.weekday().num_days_from_monday());
        assert!(!by_day.contains_key(&0));
        assert_relative_eq!(by_day[&1], 10.0, epsilon = 1e-9);
        assert_relative_eq!(by_day[&2], -10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_bar_is_insufficient() {
        assert!(SeasonalityAnalyzer::default().analyze(&daily(&[1.0])).is_err());
    }
}
