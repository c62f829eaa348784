//! Exit levels, position sizing and open-trade management
//!
//! Levels are ATR multiples around the entry (last close):
//! ```text
//! stop_loss   = entry ∓ ATR × sl_atr_mult
//! take_profit = entry ± ATR × tp_atr_mult
//! reward_risk = |take_profit − entry| / |entry − stop_loss|
//! ```
//!
//! Sizing is currency-agnostic: equity and prices only need to share the
//! same denomination.
//! ```text
//! size = equity × risk_pct% / |entry − stop_loss|
//! ```

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::RiskConfig;
use crate::types::{Direction, Money};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExitLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reward_risk: f64,
}

/// Reward over risk, rounded to two decimals; 0 when there is no risk.
pub fn reward_risk(entry: f64, stop_loss: f64, take_profit: f64) -> f64 {
    let risk = (entry - stop_loss).abs();
    if risk == 0.0 || !risk.is_finite() {
        return 0.0;
    }
    let rr = (take_profit - entry).abs() / risk;
    if rr.is_finite() {
        (rr * 100.0).round() / 100.0
    } else {
        0.0
    }
}

/// Bollinger bands at the entry bar, used for optional clamping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub lower: f64,
}

/// ATR-multiple stop and target for `direction`. `None` for a flat signal
/// or an undefined ATR.
pub fn exit_levels(
    direction: Direction,
    entry: f64,
    atr: f64,
    bands: Option<Bands>,
    cfg: &RiskConfig,
) -> Option<ExitLevels> {
    if !direction.is_actionable() || !atr.is_finite() || !entry.is_finite() {
        return None;
    }
    let sign = direction.sign();
    let mut stop_loss = entry - sign * atr * cfg.sl_atr_mult;
    let mut take_profit = entry + sign * atr * cfg.tp_atr_mult;

    if let Some(Bands { upper, lower }) = bands {
        match direction {
            Direction::Buy => {
                if cfg.tp_at_band {
                    take_profit = take_profit.min(upper);
                }
                if cfg.sl_at_band {
                    stop_loss = stop_loss.max(lower);
                }
            }
            Direction::Sell => {
                if cfg.tp_at_band {
                    take_profit = take_profit.max(lower);
                }
                if cfg.sl_at_band {
                    stop_loss = stop_loss.min(upper);
                }
            }
            Direction::Flat => {}
        }
    }

    Some(ExitLevels {
        entry,
        stop_loss,
        take_profit,
        reward_risk: reward_risk(entry, stop_loss, take_profit),
    })
}

/// Units to trade so that hitting the stop loses `risk_pct` of equity.
/// Zero means do not trade.
pub fn position_size(entry: f64, stop_loss: f64, cfg: &RiskConfig) -> Money {
    let distance = (entry - stop_loss).abs();
    if distance == 0.0 || !distance.is_finite() {
        return Money::ZERO;
    }
    let (Ok(distance), Ok(pct)) = (Decimal::try_from(distance), Decimal::try_from(cfg.risk_pct)) else {
        return Money::ZERO;
    };
    let risk_amount = cfg.equity.inner() * pct / Decimal::ONE_HUNDRED;
    Money::new(risk_amount / distance).round_dp(4)
}

/// Result of marking an open trade to a new price
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExitUpdate {
    pub stop_loss: f64,
    /// Stop moved to entry on this update
    pub breakeven_triggered: bool,
    /// First partial take-profit level reached on this update
    pub partial_triggered: bool,
    pub stop_hit: bool,
    pub target_hit: bool,
}

/// An alerted position being followed after entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenTrade {
    pub direction: Direction,
    pub entry: f64,
    pub initial_stop: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub at_breakeven: bool,
    pub partial_taken: bool,
}

impl OpenTrade {
    pub fn open(direction: Direction, levels: &ExitLevels) -> Option<Self> {
        direction.is_actionable().then_some(Self {
            direction,
            entry: levels.entry,
            initial_stop: levels.stop_loss,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            at_breakeven: false,
            partial_taken: false,
        })
    }

    /// Profit in price units (positive when the trade is winning)
    pub fn profit(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry)
    }

    /// Profit in units of initial risk
    pub fn rr_since_entry(&self, price: f64) -> f64 {
        let risk = (self.entry - self.initial_stop).abs();
        if risk == 0.0 {
            0.0
        } else {
            self.profit(price) / risk
        }
    }

    /// Tighter of two stops for this direction
    fn tighter(&self, a: f64, b: f64) -> f64 {
        match self.direction {
            Direction::Sell => a.min(b),
            _ => a.max(b),
        }
    }

    /// Mark to `price`. The stop only ever moves in the trade's favour.
    pub fn update(&mut self, price: f64, atr: f64, cfg: &RiskConfig) -> ExitUpdate {
        let mut update = ExitUpdate {
            stop_loss: self.stop_loss,
            breakeven_triggered: false,
            partial_triggered: false,
            stop_hit: false,
            target_hit: false,
        };
        if !price.is_finite() {
            return update;
        }

        let profit = self.profit(price);
        let rr = self.rr_since_entry(price);

        if cfg.use_trailing && atr.is_finite() {
            let target_distance = (self.take_profit - self.entry).abs();
            if profit >= target_distance * cfg.trailing_activation {
                let candidate = price - self.direction.sign() * atr * cfg.trailing_atr_mult;
                self.stop_loss = self.tighter(self.stop_loss, candidate);
            }
        }

        if !self.at_breakeven && rr >= cfg.breakeven_at_rr {
            self.at_breakeven = true;
            update.breakeven_triggered = true;
        }
        if self.at_breakeven {
            self.stop_loss = self.tighter(self.stop_loss, self.entry);
        }

        if !self.partial_taken && rr >= cfg.partial_tp_rr {
            self.partial_taken = true;
            update.partial_triggered = true;
        }

        update.stop_loss = self.stop_loss;
        update.stop_hit = self.profit(price) <= self.profit(self.stop_loss);
        update.target_hit = profit >= (self.take_profit - self.entry).abs();
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_levels() {
        let cfg = RiskConfig::default();
        let levels = exit_levels(Direction::Buy, 100.0, 2.0, None, &cfg).unwrap();
        assert_relative_eq!(levels.stop_loss, 97.0);
        assert_relative_eq!(levels.take_profit, 105.0);
        assert_eq!(levels.reward_risk, 1.67);
    }

    #[test]
    fn test_sell_levels_mirror() {
        let cfg = RiskConfig::default();
        let levels = exit_levels(Direction::Sell, 100.0, 2.0, None, &cfg).unwrap();
        assert_relative_eq!(levels.stop_loss, 103.0);
        assert_relative_eq!(levels.take_profit, 95.0);
        assert!(exit_levels(Direction::Flat, 100.0, 2.0, None, &cfg).is_none());
    }

    #[test]
    fn test_reward_risk_zero_risk() {
        assert_eq!(reward_risk(100.0, 100.0, 110.0), 0.0);
        assert_eq!(reward_risk(100.0, 90.0, 130.0), 3.0);
    }

    #[test]
    fn test_band_clamp() {
        let cfg = RiskConfig::default().with_band_clamp(true, true);
        let bands = Bands {
            upper: 103.0,
            lower: 98.0,
        };
        let levels = exit_levels(Direction::Buy, 100.0, 2.0, Some(bands), &cfg).unwrap();
        assert_eq!(levels.take_profit, 103.0);
        assert_eq!(levels.stop_loss, 98.0);
        assert_eq!(levels.reward_risk, 1.5);
    }

    #[test]
    fn test_position_size() {
        let cfg = RiskConfig::default();
        // 1% of 10_000 over a 3.0 stop distance
        assert_eq!(position_size(100.0, 97.0, &cfg).inner(), dec!(33.3333));
        assert_eq!(position_size(100.0, 100.0, &cfg), Money::ZERO);
    }

    #[test]
    fn test_trailing_stop_never_loosens() {
        let cfg = RiskConfig::default().with_breakeven_at(10.0);
        let levels = exit_levels(Direction::Buy, 100.0, 2.0, None, &cfg).unwrap();
        let mut trade = OpenTrade::open(Direction::Buy, &levels).unwrap();

        let mut last = trade.stop_loss;
        for price in [101.0, 103.0, 104.0, 102.5, 103.5, 101.0] {
            let update = trade.update(price, 2.0, &cfg);
            assert!(update.stop_loss >= last, "stop loosened at {}", price);
            last = update.stop_loss;
        }
        // activated at 103 (profit 3 >= 2.5), best candidate 104 - 2
        assert_eq!(trade.stop_loss, 102.0);
    }

    #[test]
    fn test_sell_trailing_ratchets_down() {
        let cfg = RiskConfig::default().with_breakeven_at(10.0);
        let levels = exit_levels(Direction::Sell, 100.0, 2.0, None, &cfg).unwrap();
        let mut trade = OpenTrade::open(Direction::Sell, &levels).unwrap();

        let mut last = trade.stop_loss;
        for price in [99.0, 97.0, 96.0, 98.0] {
            let update = trade.update(price, 2.0, &cfg);
            assert!(update.stop_loss <= last);
            last = update.stop_loss;
        }
        assert_eq!(trade.stop_loss, 98.0);
    }

    #[test]
    fn test_breakeven_is_permanent() {
        let cfg = RiskConfig::default().with_trailing(false, 1.0);
        let levels = exit_levels(Direction::Buy, 100.0, 2.0, None, &cfg).unwrap();
        let mut trade = OpenTrade::open(Direction::Buy, &levels).unwrap();

        // risk 3, breakeven at 1.2R = +3.6
        let first = trade.update(103.7, 2.0, &cfg);
        assert!(first.breakeven_triggered);
        assert!(first.partial_triggered);
        assert_eq!(first.stop_loss, 100.0);

        let second = trade.update(100.5, 2.0, &cfg);
        assert!(!second.breakeven_triggered);
        assert_eq!(second.stop_loss, 100.0);
        assert!(!second.stop_hit);

        let third = trade.update(99.9, 2.0, &cfg);
        assert!(third.stop_hit);
    }

    #[test]
    fn test_target_hit() {
        let cfg = RiskConfig::default();
        let levels = exit_levels(Direction::Buy, 100.0, 2.0, None, &cfg).unwrap();
        let mut trade = OpenTrade::open(Direction::Buy, &levels).unwrap();
        assert!(trade.update(105.0, 2.0, &cfg).target_hit);
    }
}
