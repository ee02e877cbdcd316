use crate::config::IndicatorConfig;
use crate::error::IndicatorError;
use serde::Serialize;
use ta::Next;
use ta::indicators::{ExponentialMovingAverage, RelativeStrengthIndex};

/// RSI over the last `period` gains and losses.
///
/// Deltas between consecutive prices are split into gains and losses (zero
/// deltas count as neither). The last `period` entries of each list are summed
/// and divided by `period` itself, even when fewer entries exist. This is not
/// Wilder's smoothing; see [`smoothed_rsi`] for that.
///
/// Returns exactly 100 when there is no loss in the window.
pub fn compute_rsi(prices: &[f64], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod(period));
    }
    if prices.len() < 2 {
        return Err(IndicatorError::NotEnoughData {
            needed: 2,
            got: prices.len(),
        });
    }

    let mut gains = Vec::new();
    let mut losses = Vec::new();
    for pair in prices.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains.push(delta);
        } else if delta < 0.0 {
            losses.push(delta.abs());
        }
    }

    let avg_gain = fixed_window_average(&gains, period);
    let avg_loss = fixed_window_average(&losses, period);

    if avg_loss == 0.0 {
        return Ok(100.0);
    }
    let relative_strength = avg_gain / avg_loss;
    Ok(100.0 - 100.0 / (1.0 + relative_strength))
}

fn fixed_window_average(values: &[f64], period: usize) -> f64 {
    let start = values.len().saturating_sub(period);
    values[start..].iter().sum::<f64>() / period as f64
}

/// Running EMA aligned one-to-one with `prices`, seeded with the first price.
pub fn compute_ema(prices: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    if prices.is_empty() {
        return Err(IndicatorError::NotEnoughData { needed: 1, got: 0 });
    }
    // ta's EMA uses k = 2 / (period + 1) and returns its first input unchanged.
    let mut ema =
        ExponentialMovingAverage::new(period).map_err(|_| IndicatorError::InvalidPeriod(period))?;
    Ok(prices.iter().map(|&price| ema.next(price)).collect())
}

/// RSI as of each candle, for charting. Entry `i` is the RSI over
/// `prices[..=i]`, so the last entry equals the scored RSI. Earlier charts
/// plotted the RSI over `prices[..i]` from `i > period`, one candle behind.
/// Entries before index `period` have too little history.
pub fn rsi_history(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|i| {
            if i < period {
                None
            } else {
                compute_rsi(&prices[..=i], period).ok()
            }
        })
        .collect()
}

/// Smoothed RSI from the `ta` crate. Shown next to the scoring RSI for
/// comparison; never used for scoring.
pub fn smoothed_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() <= period {
        return None;
    }
    let mut rsi = RelativeStrengthIndex::new(period).ok()?;
    let mut last = None;
    for &price in prices {
        last = Some(rsi.next(price));
    }
    last
}

/// Indicators derived from one closing-price sequence, recomputed from scratch each call.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub ema_short: Vec<f64>,
    pub ema_long: Vec<f64>,
}

impl IndicatorSnapshot {
    pub fn compute(closes: &[f64], config: &IndicatorConfig) -> Result<Self, IndicatorError> {
        Ok(Self {
            rsi: compute_rsi(closes, config.rsi_period)?,
            ema_short: compute_ema(closes, config.ema_short)?,
            ema_long: compute_ema(closes, config.ema_long)?,
        })
    }

    pub fn latest_short(&self) -> Option<f64> {
        self.ema_short.last().copied()
    }

    pub fn latest_long(&self) -> Option<f64> {
        self.ema_long.last().copied()
    }
}
