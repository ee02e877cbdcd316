//! Bullishness scoring on top of the indicator engine.

use crate::candles::PriceSeries;
use crate::coingecko::MarketFeed;
use crate::config::IndicatorConfig;
use crate::indicators::IndicatorSnapshot;
use serde::Serialize;
use tracing::{debug, warn};

pub const MAX_SCORE: u8 = 3;
pub const OVERSOLD_RSI: f64 = 30.0;
/// Upper guide line on the RSI chart. Not part of the score.
pub const OVERBOUGHT_RSI: f64 = 70.0;

/// The three independent conditions behind the score.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BullishSignals {
    /// RSI below 30.
    pub oversold: bool,
    /// Short EMA above long EMA.
    pub trend_up: bool,
    /// Latest price above the short EMA.
    pub above_short_ema: bool,
}

impl BullishSignals {
    pub fn evaluate(rsi: f64, ema_short: f64, ema_long: f64, price: f64) -> Self {
        Self {
            oversold: rsi < OVERSOLD_RSI,
            trend_up: ema_short > ema_long,
            above_short_ema: price > ema_short,
        }
    }

    pub fn score(&self) -> u8 {
        [self.oversold, self.trend_up, self.above_short_ema]
            .into_iter()
            .filter(|&hit| hit)
            .count() as u8
    }
}

pub fn score_asset(rsi: f64, ema_short_latest: f64, ema_long_latest: f64, price_latest: f64) -> u8 {
    BullishSignals::evaluate(rsi, ema_short_latest, ema_long_latest, price_latest).score()
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScoredAsset {
    pub asset_id: String,
    pub price: f64,
    pub rsi: f64,
    pub ema_short: f64,
    pub ema_long: f64,
    pub score: u8,
}

impl ScoredAsset {
    pub fn is_max_bullish(&self) -> bool {
        self.score == MAX_SCORE
    }
}

/// Scores an already fetched series. `None` when the series is shorter than
/// the RSI period.
pub fn analyze_series(
    asset_id: &str,
    series: &PriceSeries,
    config: &IndicatorConfig,
) -> Option<ScoredAsset> {
    if series.is_empty() || series.len() < config.rsi_period {
        debug!(asset_id, points = series.len(), "not enough candles, skipping");
        return None;
    }

    let closes = series.closes();
    let snapshot = IndicatorSnapshot::compute(&closes, config).ok()?;
    let price = series.last()?.close;
    let ema_short = snapshot.latest_short()?;
    let ema_long = snapshot.latest_long()?;

    Some(ScoredAsset {
        asset_id: asset_id.to_string(),
        price,
        rsi: snapshot.rsi,
        ema_short,
        ema_long,
        score: score_asset(snapshot.rsi, ema_short, ema_long, price),
    })
}

/// Fetches and scores one asset. Fetch failures and short series both yield
/// `None` so the caller can carry on with the next asset.
pub async fn analyze_asset(
    feed: &dyn MarketFeed,
    asset_id: &str,
    config: &IndicatorConfig,
) -> Option<ScoredAsset> {
    let series = match feed.fetch_ohlc(asset_id).await {
        Ok(series) => series,
        Err(e) => {
            warn!(asset_id, error = %e, "price fetch failed, skipping");
            return None;
        }
    };
    analyze_series(asset_id, &series, config)
}
