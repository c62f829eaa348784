//! Volume-at-price nodes and consolidation order blocks

use std::collections::BTreeSet;

use ordered_float::OrderedFloat;
use serde::Serialize;

use super::{require_bars, AnalysisError, Analyzer, AnalyzerKind, SubScore, SubScoreDetail};
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeNode {
    /// Bin centre
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumeProfileDetail {
    pub nodes: Vec<VolumeNode>,
    pub order_blocks: Vec<f64>,
    pub node_hit: Option<f64>,
    pub block_hit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct VolumeProfileAnalyzer {
    pub bins: usize,
    pub top_nodes: usize,
    pub block_lookback: usize,
    pub block_tolerance: f64,
    pub max_blocks: usize,
    /// Relative distance from the last close that counts as a hit
    pub hit_tolerance: f64,
}

impl Default for VolumeProfileAnalyzer {
    fn default() -> Self {
        Self {
            bins: 20,
            top_nodes: 5,
            block_lookback: 100,
            block_tolerance: 0.003,
            max_blocks: 3,
            hit_tolerance: 0.005,
        }
    }
}

impl VolumeProfileAnalyzer {
    /// Equal-width close-price bins, heaviest first.
    pub fn volume_nodes(&self, bars: &[Bar]) -> Vec<VolumeNode> {
        if bars.is_empty() || self.bins == 0 {
            return Vec::new();
        }
        let min = bars.iter().map(|b| b.close).fold(f64::INFINITY, f64::min);
        let max = bars.iter().map(|b| b.close).fold(f64::NEG_INFINITY, f64::max);
        if min >= max {
            return Vec::new();
        }

        let width = (max - min) / self.bins as f64;
        let mut volumes = vec![0.0; self.bins];
        for bar in bars {
            // the top edge belongs to the last bin
            let idx = (((bar.close - min) / width) as usize).min(self.bins - 1);
            volumes[idx] += bar.volume;
        }

        let mut nodes: Vec<VolumeNode> = volumes
            .into_iter()
            .enumerate()
            .map(|(i, volume)| VolumeNode {
                price: min + width * (i as f64 + 0.5),
                volume,
            })
            .collect();
        // stable sort keeps lower prices first on ties
        nodes.sort_by_key(|n| std::cmp::Reverse(OrderedFloat(n.volume)));
        nodes.truncate(self.top_nodes);
        nodes
    }

    /// Closes sitting inside a tight consolidation: the mean of the two
    /// closes before and the two after are both within tolerance.
    pub fn order_blocks(&self, bars: &[Bar]) -> Vec<f64> {
        if bars.len() < self.block_lookback || self.block_lookback < 5 {
            return Vec::new();
        }
        let closes: Vec<f64> = bars[bars.len() - self.block_lookback..].iter().map(|b| b.close).collect();

        let mut blocks: BTreeSet<OrderedFloat<f64>> = BTreeSet::new();
        for i in 2..closes.len() - 2 {
            let c = closes[i];
            let before = (closes[i - 2] + closes[i - 1]) / 2.0;
            let after = (closes[i + 1] + closes[i + 2]) / 2.0;
            let tol = c * self.block_tolerance;
            if (before - c).abs() < tol && (after - c).abs() < tol {
                blocks.insert(OrderedFloat(c));
            }
        }

        blocks.into_iter().take(self.max_blocks).map(|b| b.into_inner()).collect()
    }
}

impl Analyzer for VolumeProfileAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::VolumeProfile
    }

    fn analyze(&self, bars: &[Bar]) -> Result<SubScore, AnalysisError> {
        require_bars(bars, 1)?;
        let price = bars[bars.len() - 1].close;
        if !price.is_finite() {
            return Err(AnalysisError::Degenerate("non-finite close"));
        }

        let nodes = self.volume_nodes(bars);
        let order_blocks = self.order_blocks(bars);
        let tolerance = price * self.hit_tolerance;

        let node_hit = nodes
            .iter()
            .map(|n| n.price)
            .find(|p| (price - p).abs() <= tolerance);
        let block_hit = order_blocks.iter().copied().find(|b| (price - b).abs() <= tolerance);

        let score = node_hit.map_or(0.0, |_| 1.0) + block_hit.map_or(0.0, |_| 1.0);

        Ok(SubScore::new(
            AnalyzerKind::VolumeProfile,
            score,
            SubScoreDetail::VolumeProfile(VolumeProfileDetail {
                nodes,
                order_blocks,
                node_hit,
                block_hit,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(closes_volumes: &[(f64, f64)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes_volumes
            .iter()
            .enumerate()
            .map(|(i, &(c, v))| Bar::new_unchecked(start + Duration::hours(i as i64), c, c, c, c, v))
            .collect()
    }

    #[test]
    fn test_nodes_sorted_by_volume() {
        let analyzer = VolumeProfileAnalyzer {
            bins: 4,
            top_nodes: 2,
            ..Default::default()
        };
        // bins of width 1 over 100..104
        let series = bars(&[(100.0, 5.0), (101.5, 50.0), (102.5, 20.0), (104.0, 1.0), (101.6, 10.0)]);
        let nodes = analyzer.volume_nodes(&series);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].price, 101.5);
        assert_eq!(nodes[0].volume, 60.0);
        assert_eq!(nodes[1].volume, 20.0);
    }

    #[test]
    fn test_max_close_lands_in_last_bin() {
        let analyzer = VolumeProfileAnalyzer {
            bins: 2,
            ..Default::default()
        };
        let nodes = analyzer.volume_nodes(&bars(&[(10.0, 1.0), (20.0, 7.0)]));
        assert_eq!(nodes[0].price, 17.5);
        assert_eq!(nodes[0].volume, 7.0);
    }

    #[test]
    fn test_order_blocks_need_consolidation() {
        let analyzer = VolumeProfileAnalyzer {
            block_lookback: 10,
            ..Default::default()
        };
        let flat = bars(&[(100.0, 1.0); 10]);
        assert_eq!(analyzer.order_blocks(&flat), vec![100.0]);

        let moving: Vec<(f64, f64)> = (0..10).map(|i| (100.0 + 5.0 * i as f64, 1.0)).collect();
        assert!(analyzer.order_blocks(&bars(&moving)).is_empty());
        assert!(analyzer.order_blocks(&flat[..9]).is_empty());
    }

    #[test]
    fn test_score_counts_node_and_block_hits() {
        let mut series = vec![(100.0, 10.0); 120];
        series[10] = (110.0, 1.0);
        let sub = VolumeProfileAnalyzer::default().analyze(&bars(&series)).unwrap();
        let SubScoreDetail::VolumeProfile(detail) = &sub.detail else {
            panic!("wrong detail variant");
        };
        // heaviest bin is centred at 100.25, within 0.5% of the close
        assert!(detail.node_hit.is_some());
        assert_eq!(detail.block_hit, Some(100.0));
        assert_eq!(sub.score, 2.0);
    }
}
