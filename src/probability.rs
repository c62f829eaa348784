//! Probability estimate (0..=100) attached to every evaluation

use crate::config::ProbabilityConfig;

/// Estimate for an approved signal from trend strength and reward:risk,
/// then reduced for a soft-passed ADX gate and for thin volume.
pub fn estimate(adx: f64, rr: f64, soft_pass: bool, low_volume: bool, cfg: &ProbabilityConfig) -> f64 {
    let adx_bonus = if adx.is_finite() { ((adx - 20.0) * 1.2).trunc() } else { 0.0 };
    let rr_bonus = if rr.is_finite() { ((rr - 1.5) * 10.0).trunc() } else { 0.0 };

    let mut p = (50.0 + adx_bonus + rr_bonus).min(cfg.cap);
    if soft_pass {
        p = (p - cfg.soft_pass_penalty).max(cfg.soft_pass_floor);
    }
    if low_volume {
        p = (p - cfg.low_volume_penalty).max(cfg.low_volume_floor);
    }
    p
}

/// Score-only tiers, used when no levels exist to estimate from.
pub fn score_to_probability(total_score: f64) -> f64 {
    const TIERS: [(f64, f64); 8] = [
        (4.5, 90.0),
        (4.0, 85.0),
        (3.5, 75.0),
        (3.0, 65.0),
        (2.5, 55.0),
        (2.0, 50.0),
        (1.5, 45.0),
        (1.0, 40.0),
    ];
    TIERS
        .iter()
        .find(|(floor, _)| total_score >= *floor)
        .map(|&(_, p)| p)
        .unwrap_or(if total_score > 0.0 { 30.0 } else { 20.0 })
}
