use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::env;

// CONFIGURATION STRUCTS
// Every field has a default, so a partial config.json is enough.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MarketConfig {
    pub api_base_url: String,
    pub vs_currency: String,   // e.g., "usd"
    pub lookback_days: u32,    // days of candles per analysis
    pub top_n: u32,            // assets taken from the market-cap listing
    pub request_delay_ms: u64, // pause between per-asset OHLC requests
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.coingecko.com/api/v3".to_string(),
            vs_currency: "usd".to_string(),
            lookback_days: 2,
            top_n: 20,
            request_delay_ms: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub ema_short: usize,
    pub ema_long: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_short: 9,
            ema_long: 21,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base_url: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.telegram.org".to_string(),
            bot_token: None,
            chat_id: None,
            timeout_secs: 10,
        }
    }
}

impl TelegramConfig {
    /// Token and chat id, if both are present and non-blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.bot_token.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let chat = self.chat_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((token, chat))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub indicators: IndicatorConfig,
    pub telegram: TelegramConfig,
}

impl AppConfig {
    /// Reads `.env` and applies `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID` and
    /// `COINGECKO_API_URL` on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        dotenv::dotenv().ok();

        if let Some(token) = env_non_empty("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = env_non_empty("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(chat_id);
        }
        if let Some(url) = env_non_empty("COINGECKO_API_URL") {
            self.market.api_base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ind = &self.indicators;
        if ind.rsi_period == 0 || ind.ema_short == 0 || ind.ema_long == 0 {
            bail!(
                "indicator periods must be positive (rsi={}, ema_short={}, ema_long={})",
                ind.rsi_period,
                ind.ema_short,
                ind.ema_long
            );
        }
        if self.market.lookback_days == 0 {
            bail!("market.lookback_days must be at least 1");
        }
        if self.market.top_n == 0 {
            bail!("market.top_n must be at least 1");
        }
        if self.market.vs_currency.trim().is_empty() {
            bail!("market.vs_currency must not be empty");
        }
        if self.telegram.timeout_secs == 0 {
            bail!("telegram.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
