//! Ranking of scored assets and per-session alert bookkeeping.

use crate::config::IndicatorConfig;
use crate::scoring::{MAX_SCORE, ScoredAsset};
use crate::telegram::Notifier;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const CONNECTED_MESSAGE: &str = "✅ Telegram bot connected and ready to send alerts!";

// Characters legacy Telegram Markdown treats as markup.
static MARKDOWN_SPECIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([_*`\[])").expect("valid markdown pattern"));

/// Maximal-score assets, highest score first. The sort is stable, so equal
/// scores keep their fetch order.
pub fn rank_bullish(assets: &[ScoredAsset]) -> Vec<ScoredAsset> {
    let mut ranked: Vec<ScoredAsset> = assets
        .iter()
        .filter(|a| a.is_max_bullish())
        .cloned()
        .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    Connected,
    ConnectionFailed { reason: String },
    Sent { asset_id: String },
    Failed { asset_id: String, reason: String },
}

impl fmt::Display for AlertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Telegram connection notice sent"),
            Self::ConnectionFailed { reason } => {
                write!(f, "Failed to send Telegram connection notice: {reason}")
            }
            Self::Sent { asset_id } => {
                write!(f, "Telegram alert sent for {}", asset_id.to_uppercase())
            }
            Self::Failed { asset_id, reason } => write!(
                f,
                "Failed to send alert for {}: {reason}",
                asset_id.to_uppercase()
            ),
        }
    }
}

/// State that lives exactly as long as one dashboard session. Nothing here is
/// written to disk.
#[derive(Debug, Default)]
pub struct Session {
    notified: HashSet<String>,
    bot_connected: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_notified(&self, asset_id: &str) -> bool {
        self.notified.contains(asset_id)
    }

    pub fn notified_count(&self) -> usize {
        self.notified.len()
    }

    pub fn bot_connected(&self) -> bool {
        self.bot_connected
    }

    /// Sends the connection notice once per session. Returns `None` when it
    /// was already delivered.
    pub async fn announce(&mut self, notifier: &dyn Notifier) -> Option<AlertOutcome> {
        if self.bot_connected {
            return None;
        }
        match notifier.send(CONNECTED_MESSAGE).await {
            Ok(()) => {
                self.bot_connected = true;
                info!("telegram connection notice sent");
                Some(AlertOutcome::Connected)
            }
            Err(e) => {
                warn!(error = %e, "telegram connection notice failed");
                Some(AlertOutcome::ConnectionFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Alerts every ranked asset not yet notified in this session. Failed
    /// deliveries stay eligible for the next pass; already notified assets are
    /// skipped without an outcome.
    pub async fn dispatch_alerts(
        &mut self,
        ranked: &[ScoredAsset],
        notifier: &dyn Notifier,
        config: &IndicatorConfig,
    ) -> Vec<AlertOutcome> {
        let mut outcomes = Vec::new();
        for asset in ranked {
            if self.is_notified(&asset.asset_id) {
                continue;
            }
            let message = format_alert(asset, config);
            match notifier.send(&message).await {
                Ok(()) => {
                    info!(asset_id = %asset.asset_id, "bullish alert sent");
                    self.notified.insert(asset.asset_id.clone());
                    outcomes.push(AlertOutcome::Sent {
                        asset_id: asset.asset_id.clone(),
                    });
                }
                Err(e) => {
                    warn!(asset_id = %asset.asset_id, error = %e, "bullish alert failed");
                    outcomes.push(AlertOutcome::Failed {
                        asset_id: asset.asset_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcomes
    }
}

pub fn escape_markdown(text: &str) -> String {
    MARKDOWN_SPECIAL.replace_all(text, r"\$1").into_owned()
}

pub fn format_alert(asset: &ScoredAsset, config: &IndicatorConfig) -> String {
    format!(
        "🚀 *Bullish Alert!*\n\
         Asset: *{}*\n\
         Price: ${:.4}\n\
         RSI: {:.2}\n\
         EMA{}: {:.4}\n\
         EMA{}: {:.4}\n\
         Bullish score: {}/{}\n\
         \n\
         Keep an eye on it!",
        escape_markdown(&asset.asset_id.to_uppercase()),
        asset.price,
        asset.rsi,
        config.ema_short,
        asset.ema_short,
        config.ema_long,
        asset.ema_long,
        asset.score,
        MAX_SCORE,
    )
}
