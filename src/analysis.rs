//! This module contains the evaluation pass and single-asset inspection.

use crate::candles::PriceSeries;
use crate::coingecko::{AssetSummary, MarketFeed};
use crate::config::{AppConfig, IndicatorConfig};
use crate::indicators::{self, IndicatorSnapshot};
use crate::report::{self, AlertOutcome, Session};
use crate::scoring::{self, BullishSignals, ScoredAsset};
use crate::telegram::Notifier;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Everything one pass produced, in listing order.
#[derive(Serialize, Debug, Clone)]
pub struct DashboardSnapshot {
    pub taken_at: DateTime<Utc>,
    pub listing: Vec<AssetSummary>,
    pub scored: Vec<ScoredAsset>,
    pub bullish: Vec<ScoredAsset>,
    pub alerts: Vec<AlertOutcome>,
}

/// Runs one evaluation pass:
/// 1. Fetches the market-cap listing.
/// 2. Fetches and scores each listed asset, one request at a time.
/// 3. Ranks the maximal-score assets and alerts the ones new to this session.
pub async fn run_pass(
    feed: &dyn MarketFeed,
    notifier: Option<&dyn Notifier>,
    session: &mut Session,
    config: &AppConfig,
) -> DashboardSnapshot {
    let listing = match feed.fetch_top_assets().await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(error = %e, "market listing unavailable");
            Vec::new()
        }
    };

    let delay = Duration::from_millis(config.market.request_delay_ms);
    let mut scored = Vec::with_capacity(listing.len());
    for (i, asset) in listing.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(result) = scoring::analyze_asset(feed, &asset.id, &config.indicators).await {
            scored.push(result);
        }
    }

    let bullish = report::rank_bullish(&scored);
    let alerts = match notifier {
        Some(notifier) => {
            session
                .dispatch_alerts(&bullish, notifier, &config.indicators)
                .await
        }
        None => Vec::new(),
    };

    info!(
        listed = listing.len(),
        scored = scored.len(),
        bullish = bullish.len(),
        "pass complete"
    );

    DashboardSnapshot {
        taken_at: Utc::now(),
        listing,
        scored,
        bullish,
        alerts,
    }
}

/// Full indicator view of one asset, for charts and the signal breakdown.
#[derive(Serialize, Debug, Clone)]
pub struct AssetDetail {
    pub asset_id: String,
    pub series: PriceSeries,
    pub indicators: IndicatorSnapshot,
    pub rsi_history: Vec<Option<f64>>,
    pub smoothed_rsi: Option<f64>,
    pub price: f64,
    pub signals: BullishSignals,
}

impl AssetDetail {
    pub fn from_series(
        asset_id: &str,
        series: PriceSeries,
        config: &IndicatorConfig,
    ) -> Result<Self> {
        let closes = series.closes();
        let Some(&price) = closes.last() else {
            bail!("no price data for {asset_id}, try another asset");
        };
        let indicators = IndicatorSnapshot::compute(&closes, config)
            .with_context(|| format!("cannot compute indicators for {asset_id}"))?;
        let signals = BullishSignals::evaluate(
            indicators.rsi,
            indicators.latest_short().unwrap_or(price),
            indicators.latest_long().unwrap_or(price),
            price,
        );

        Ok(Self {
            asset_id: asset_id.to_string(),
            rsi_history: indicators::rsi_history(&closes, config.rsi_period),
            smoothed_rsi: indicators::smoothed_rsi(&closes, config.rsi_period),
            series,
            indicators,
            price,
            signals,
        })
    }

    pub fn score(&self) -> u8 {
        self.signals.score()
    }
}

pub async fn inspect_asset(
    feed: &dyn MarketFeed,
    asset_id: &str,
    config: &IndicatorConfig,
) -> Result<AssetDetail> {
    let series = feed
        .fetch_ohlc(asset_id)
        .await
        .with_context(|| format!("failed to fetch {asset_id}, try another asset"))?;
    AssetDetail::from_series(asset_id, series, config)
}
