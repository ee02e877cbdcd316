use reqwest::StatusCode;
use thiserror::Error;

/// Why the price feed or the market listing produced no data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS)
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The wrapped error has its URL stripped, since it embeds the bot token.
    #[error("notification request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("notification rejected with status {status}: {description}")]
    Rejected {
        status: StatusCode,
        description: String,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("indicator period must be positive, got {0}")]
    InvalidPeriod(usize),
    #[error("need at least {needed} prices, got {got}")]
    NotEnoughData { needed: usize, got: usize },
}
