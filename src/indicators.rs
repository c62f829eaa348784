//! Technical indicators
//!
//! Moving averages and MACD are driven by the `ta` crate; RSI, ADX and ATR use
//! manual Wilder / rolling implementations because their warm-up and
//! zero-denominator semantics matter to the gate chain.
//!
//! Every series function returns one `Option<f64>` per input element. `None`
//! marks an under-warmed window or an undefined ratio (zero denominator) and
//! is never coerced into a number.

use statrs::statistics::Statistics;
use ta::indicators::{ExponentialMovingAverage, MovingAverageConvergenceDivergence, SimpleMovingAverage};
use ta::Next;

use crate::config::IndicatorConfig;
use crate::types::Columns;

/// Type alias for band indicators (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Type alias for MACD (line, signal, histogram)
pub type MacdOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Moving Averages
// =============================================================================

/// Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = indicator.next(v);
            (i + 1 >= period).then_some(out)
        })
        .collect()
}

/// Exponential Moving Average, span smoothing `2 / (period + 1)` seeded from
/// the first observation.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = indicator.next(v);
            (i + 1 >= period).then_some(out)
        })
        .collect()
}

/// Same smoothing as [`ema`] but reported from the first bar, so a long
/// trend average is usable on series shorter than its span.
pub fn ema_from_first(values: &[f64], period: usize) -> Vec<f64> {
    let Ok(mut indicator) = ExponentialMovingAverage::new(period) else {
        return Vec::new();
    };
    values.iter().map(|&v| indicator.next(v)).collect()
}

/// Rolling mean that is defined once `min_periods` observations are in the window.
pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    let min_periods = min_periods.clamp(1, window);

    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            (slice.len() >= min_periods).then(|| slice.iter().sum::<f64>() / slice.len() as f64)
        })
        .collect()
}

/// Rolling sample standard deviation (n - 1)
pub fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period < 2 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let sd = values[i + 1 - period..=i].iter().std_dev();
            sd.is_finite().then_some(sd)
        })
        .collect()
}

// =============================================================================
// Wilder Smoothing
// =============================================================================

/// Wilder's smoothing (`alpha = 1 / period`), seeded with the mean of the first
/// `period` defined observations. Undefined inputs after the seed leave the
/// running value untouched and yield `None` at that index.
fn wilders_smooth(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let mut result = Vec::with_capacity(values.len());
    let mut seed: Vec<f64> = Vec::with_capacity(period);
    let mut smoothed: Option<f64> = None;

    for value in values {
        match (smoothed, value) {
            (Some(prev), Some(v)) => {
                let next = (prev * (period - 1) as f64 + v) / period as f64;
                smoothed = Some(next);
                result.push(smoothed);
            }
            (Some(_), None) => result.push(None),
            (None, Some(v)) => {
                seed.push(*v);
                if seed.len() == period {
                    smoothed = Some(seed.iter().sum::<f64>() / period as f64);
                }
                result.push(smoothed);
            }
            (None, None) => result.push(None),
        }
    }

    result
}

// =============================================================================
// Momentum
// =============================================================================

/// RSI with Wilder smoothing. Undefined while the average loss is zero.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() {
        return vec![];
    }

    let mut gains = Vec::with_capacity(values.len());
    let mut losses = Vec::with_capacity(values.len());
    gains.push(None);
    losses.push(None);

    for w in values.windows(2) {
        let change = w[1] - w[0];
        gains.push(Some(change.max(0.0)));
        losses.push(Some((-change).max(0.0)));
    }

    let avg_gains = wilders_smooth(&gains, period);
    let avg_losses = wilders_smooth(&losses, period);

    avg_gains
        .into_iter()
        .zip(avg_losses)
        .map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) if l > 0.0 => Some(100.0 - 100.0 / (1.0 + g / l)),
            _ => None,
        })
        .collect()
}

/// MACD line, signal line and histogram.
///
/// The line is defined after `slow` observations, the signal and histogram
/// after `slow + signal - 1`.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let n = values.len();
    let mut indicator = match MovingAverageConvergenceDivergence::new(fast, slow, signal) {
        Ok(i) => i,
        Err(_) => return (vec![None; n], vec![None; n], vec![None; n]),
    };

    let line_warmup = slow;
    let signal_warmup = slow + signal.saturating_sub(1);

    let mut line = Vec::with_capacity(n);
    let mut sig = Vec::with_capacity(n);
    let mut hist = Vec::with_capacity(n);

    for (i, &value) in values.iter().enumerate() {
        let out = indicator.next(value);
        line.push((i + 1 >= line_warmup).then_some(out.macd));
        if i + 1 >= signal_warmup {
            sig.push(Some(out.signal));
            hist.push(Some(out.histogram));
        } else {
            sig.push(None);
            hist.push(None);
        }
    }

    (line, sig, hist)
}

// =============================================================================
// Volatility
// =============================================================================

/// True Range. The first element has no previous close and uses high - low.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let hl = high[i] - low[i];
        let value = if i == 0 {
            hl
        } else {
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(value);
    }

    tr
}

/// Average True Range as the rolling mean of true range over `period` bars.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    rolling_mean(&tr, period, period)
}

/// Bollinger Bands over a rolling mean and sample standard deviation.
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    let middle = rolling_mean(values, period, period);
    let std = rolling_std(values, period);

    let mut upper = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (mid, sd) in middle.iter().zip(&std) {
        match (mid, sd) {
            (Some(m), Some(s)) => {
                upper.push(Some(m + num_std * s));
                lower.push(Some(m - num_std * s));
            }
            _ => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    (upper, middle, lower)
}

/// Band width as a percentage of price
pub fn band_width_pct(upper: Option<f64>, lower: Option<f64>, close: f64) -> Option<f64> {
    match (upper, lower) {
        (Some(u), Some(l)) if close != 0.0 => Some((u - l) / close * 100.0),
        _ => None,
    }
}

/// ATR as a percentage of price
pub fn atr_pct(atr: Option<f64>, close: f64) -> Option<f64> {
    match atr {
        Some(a) if close != 0.0 => Some(a / close * 100.0),
        _ => None,
    }
}

// =============================================================================
// Trend Strength
// =============================================================================

/// Directional Movement Index (+DI, -DI), Wilder smoothed.
pub fn dmi(high: &[f64], low: &[f64], close: &[f64], period: usize) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let n = high.len();
    let mut plus_dm = vec![Some(0.0); n];
    let mut minus_dm = vec![Some(0.0); n];

    for i in 1..n {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];

        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = Some(up_move);
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = Some(down_move);
        }
    }

    let tr: Vec<Option<f64>> = true_range(high, low, close).into_iter().map(Some).collect();
    let atr_s = wilders_smooth(&tr, period);
    let plus_s = wilders_smooth(&plus_dm, period);
    let minus_s = wilders_smooth(&minus_dm, period);

    let di = |dm: Option<f64>, atr: Option<f64>| match (dm, atr) {
        (Some(dm), Some(a)) if a > 0.0 => Some(100.0 * dm / a),
        _ => None,
    };

    let plus_di = (0..n).map(|i| di(plus_s[i], atr_s[i])).collect();
    let minus_di = (0..n).map(|i| di(minus_s[i], atr_s[i])).collect();

    (plus_di, minus_di)
}

/// Average Directional Index. DX is undefined when +DI + -DI is zero; those
/// bars are skipped by the smoothing instead of counting as zero.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let (plus_di, minus_di) = dmi(high, low, close, period);

    let dx: Vec<Option<f64>> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| match (p, m) {
            (Some(p), Some(m)) if p + m > 0.0 => Some(100.0 * (p - m).abs() / (p + m)),
            _ => None,
        })
        .collect();

    wilders_smooth(&dx, period)
}

// =============================================================================
// Snapshot
// =============================================================================

/// Last-bar values of every indicator the scorer and gates read.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub ema_trend: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub bb_width_pct: Option<f64>,
    pub volume: f64,
    pub volume_ma: Option<f64>,
}

fn last(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten().filter(|v| v.is_finite())
}

impl IndicatorSnapshot {
    pub fn compute(cols: &Columns, cfg: &IndicatorConfig) -> Self {
        let Some(&close) = cols.close.last() else {
            return Self::default();
        };
        let close_series = &cols.close;

        let (macd_line, macd_signal, macd_hist) =
            macd(close_series, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        let (bb_upper, bb_middle, bb_lower) = bollinger_bands(close_series, cfg.bb_period, cfg.bb_std);
        let (plus_di, minus_di) = dmi(&cols.high, &cols.low, close_series, cfg.adx_period);
        let atr_value = last(&atr(&cols.high, &cols.low, close_series, cfg.atr_period));
        let upper = last(&bb_upper);
        let lower = last(&bb_lower);
        let ema_trend = ema_from_first(close_series, cfg.ema_trend)
            .last()
            .copied()
            .filter(|v| v.is_finite());

        Self {
            close,
            ema_fast: last(&ema(close_series, cfg.ema_fast)),
            ema_slow: last(&ema(close_series, cfg.ema_slow)),
            ema_trend,
            rsi: last(&rsi(close_series, cfg.rsi_period)),
            macd: last(&macd_line),
            macd_signal: last(&macd_signal),
            macd_histogram: last(&macd_hist),
            adx: last(&adx(&cols.high, &cols.low, close_series, cfg.adx_period)),
            plus_di: last(&plus_di),
            minus_di: last(&minus_di),
            bb_upper: upper,
            bb_middle: last(&bb_middle),
            bb_lower: lower,
            atr: atr_value,
            atr_pct: atr_pct(atr_value, close),
            bb_width_pct: band_width_pct(upper, lower, close),
            volume: cols.volume.last().copied().unwrap_or(0.0),
            volume_ma: last(&rolling_mean(
                &cols.volume,
                cfg.volume_ma_period,
                cfg.volume_ma_min_periods,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wave(n: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let close: Vec<f64> = (0..n)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1)
            .collect();
        let high = close.iter().map(|c| c + 1.0).collect();
        let low = close.iter().map(|c| c - 1.0).collect();
        (high, low, close)
    }

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0));
        assert_eq!(result[3], Some(3.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_ema_warmup_and_seed() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        // seeded from 1.0, alpha 0.5: 1.0 -> 1.5 -> 2.25
        assert_relative_eq!(result[2].unwrap(), 2.25, epsilon = 1e-12);
    }

    #[test]
    fn test_ema_from_first_matches_after_warmup() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let seeded = ema_from_first(&values, 3);
        let warmed = ema(&values, 3);

        assert_eq!(seeded.len(), 5);
        assert_eq!(seeded[0], 1.0);
        assert_relative_eq!(seeded[1], 1.5, epsilon = 1e-12);
        for i in 2..5 {
            assert_relative_eq!(seeded[i], warmed[i].unwrap(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rolling_mean_min_periods() {
        let values = vec![2.0, 4.0, 6.0, 8.0];
        let result = rolling_mean(&values, 3, 2);
        assert_eq!(result[0], None);
        assert_eq!(result[1], Some(3.0));
        assert_eq!(result[2], Some(4.0));
        assert_eq!(result[3], Some(6.0));
    }

    #[test]
    fn test_rsi_undefined_without_losses() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        assert!(rsi(&rising, 14).iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_rsi_in_range() {
        let (_, _, close) = wave(120);
        let values = rsi(&close, 14);
        assert!(values[..14].iter().all(|v| v.is_none()));
        for v in values.iter().flatten() {
            assert!((0.0..=100.0).contains(v));
        }
        assert!(values[14].is_some());
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let tr = true_range(&[10.0, 12.0], &[9.0, 11.0], &[9.5, 11.5]);
        assert_eq!(tr[0], 1.0);
        // gap up: |12 - 9.5| dominates
        assert_eq!(tr[1], 2.5);
    }

    #[test]
    fn test_atr_rolling_mean() {
        let high = vec![11.0; 20];
        let low = vec![9.0; 20];
        let close = vec![10.0; 20];
        let values = atr(&high, &low, &close, 14);
        assert_eq!(values[12], None);
        assert_relative_eq!(values[13].unwrap(), 2.0);
    }

    #[test]
    fn test_adx_bounds_and_warmup() {
        let (high, low, close) = wave(150);
        let values = adx(&high, &low, &close, 14);
        assert!(values[..26].iter().all(|v| v.is_none()));
        assert!(values[149].is_some());
        for v in values.iter().flatten() {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn test_adx_undefined_on_flat_series() {
        let flat = vec![100.0; 60];
        let values = adx(&flat, &flat, &flat, 14);
        assert!(values.iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_bollinger_sample_std() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let (upper, middle, lower) = bollinger_bands(&values, 5, 2.0);
        let sd = 2.5_f64.sqrt();
        assert_relative_eq!(middle[4].unwrap(), 3.0);
        assert_relative_eq!(upper[4].unwrap(), 3.0 + 2.0 * sd, epsilon = 1e-12);
        assert_relative_eq!(lower[4].unwrap(), 3.0 - 2.0 * sd, epsilon = 1e-12);
        assert_eq!(upper[3], None);
    }

    #[test]
    fn test_macd_warmup() {
        let (_, _, close) = wave(60);
        let (line, signal, hist) = macd(&close, 12, 26, 9);
        assert_eq!(line[24], None);
        assert!(line[25].is_some());
        assert_eq!(signal[32], None);
        assert!(signal[33].is_some());
        let h = hist[59].unwrap();
        assert_relative_eq!(h, line[59].unwrap() - signal[59].unwrap(), epsilon = 1e-9);
    }

    #[test]
    fn test_ratios_undefined_on_zero_close() {
        assert_eq!(atr_pct(Some(1.0), 0.0), None);
        assert_eq!(band_width_pct(Some(2.0), Some(1.0), 0.0), None);
        assert_eq!(atr_pct(None, 10.0), None);
        assert_relative_eq!(atr_pct(Some(0.5), 100.0).unwrap(), 0.5);
    }

    #[test]
    fn test_snapshot_on_short_series() {
        let (high, low, close) = wave(30);
        let cols = Columns {
            open: close.clone(),
            high,
            low,
            volume: vec![100.0; 30],
            close,
        };
        let snap = IndicatorSnapshot::compute(&cols, &IndicatorConfig::default());
        assert!(snap.ema_fast.is_some());
        assert!(snap.ema_slow.is_none());
        // trend EMA is unwarmed
        assert!(snap.ema_trend.is_some());
        assert!(snap.atr.is_some());
    }
}
