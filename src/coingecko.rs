use crate::candles::{self, PriceSeries};
use crate::config::MarketConfig;
use crate::error::FetchError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One row of the market-cap listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssetSummary {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "candles::deserialize_f64_lenient")]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
}

/// Price feed and market listing, as seen by the analysis pass.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Candles for `asset_id` over the configured lookback window.
    async fn fetch_ohlc(&self, asset_id: &str) -> Result<PriceSeries, FetchError>;

    /// The top assets by market cap, in listing order.
    async fn fetch_top_assets(&self) -> Result<Vec<AssetSummary>, FetchError>;
}

pub struct CoinGeckoClient {
    http: Client,
    base_url: String,
    vs_currency: String,
    lookback_days: u32,
    top_n: u32,
}

impl CoinGeckoClient {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            vs_currency: config.vs_currency.clone(),
            lookback_days: config.lookback_days,
            top_n: config.top_n,
        })
    }

    fn ohlc_url(&self, asset_id: &str) -> String {
        format!("{}/coins/{}/ohlc", self.base_url, asset_id)
    }

    fn markets_url(&self) -> String {
        format!("{}/coins/markets", self.base_url)
    }

    /// Sends a GET and returns the raw body of a successful response.
    async fn get_bytes(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, FetchError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let err = FetchError::Status {
                url: url.to_string(),
                status,
            };
            if err.is_rate_limited() {
                warn!(%url, "rate limited by price API");
            }
            return Err(err);
        }

        let body = response.bytes().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl MarketFeed for CoinGeckoClient {
    async fn fetch_ohlc(&self, asset_id: &str) -> Result<PriceSeries, FetchError> {
        let url = self.ohlc_url(asset_id);
        let query = [
            ("vs_currency", self.vs_currency.clone()),
            ("days", self.lookback_days.to_string()),
        ];
        let body = self.get_bytes(&url, &query).await?;
        let series = candles::parse_ohlc(&body).map_err(|source| FetchError::Decode {
            url: url.clone(),
            source,
        })?;
        debug!(asset_id, points = series.len(), "fetched candles");
        Ok(series)
    }

    async fn fetch_top_assets(&self) -> Result<Vec<AssetSummary>, FetchError> {
        let url = self.markets_url();
        let query = [
            ("vs_currency", self.vs_currency.clone()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", self.top_n.to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
        ];
        let body = self.get_bytes(&url, &query).await?;
        let assets = parse_listing(&body).map_err(|source| FetchError::Decode {
            url: url.clone(),
            source,
        })?;
        debug!(count = assets.len(), "fetched market listing");
        Ok(assets)
    }
}

pub fn parse_listing(body: &[u8]) -> Result<Vec<AssetSummary>, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn request_complete(request: &[u8]) -> bool {
        let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&request[..header_end]);
        let content_length = headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    /// Answers exactly one HTTP request with `status_line` and `body`.
    /// Returns the base URL and a handle yielding the raw request text.
    pub(crate) async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    /// A local address nothing listens on.
    pub(crate) async fn refused_base_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn client_for(base_url: String) -> CoinGeckoClient {
        CoinGeckoClient::new(&MarketConfig {
            api_base_url: base_url,
            ..MarketConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn parses_listing_rows() {
        let body = br#"[
            {"id": "bitcoin", "symbol": "btc", "name": "Bitcoin", "current_price": 37012.5, "market_cap_rank": 1, "sparkline_in_7d": null},
            {"id": "tether", "symbol": "usdt", "name": "Tether", "current_price": "1.0001"},
            {"id": "mystery", "current_price": null}
        ]"#;
        let assets = parse_listing(body).unwrap();
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[0].id, "bitcoin");
        assert_eq!(assets[0].market_cap_rank, Some(1));
        assert_eq!(assets[1].current_price, Some(1.0001));
        assert_eq!(assets[2].current_price, None);
        assert_eq!(assets[2].symbol, "");
    }

    #[test]
    fn listing_without_ids_fails_to_decode() {
        assert!(parse_listing(br#"[{"symbol": "btc"}]"#).is_err());
        assert!(parse_listing(br#"{"status": {"error_code": 429}}"#).is_err());
    }

    #[test]
    fn builds_endpoint_urls() {
        let config = MarketConfig {
            api_base_url: "http://localhost:9000/api/v3/".to_string(),
            ..MarketConfig::default()
        };
        let client = CoinGeckoClient::new(&config).unwrap();
        assert_eq!(
            client.ohlc_url("bitcoin"),
            "http://localhost:9000/api/v3/coins/bitcoin/ohlc"
        );
        assert_eq!(
            client.markets_url(),
            "http://localhost:9000/api/v3/coins/markets"
        );
    }

    #[test]
    fn rate_limit_status_is_recognised() {
        let err = FetchError::Status {
            url: "u".to_string(),
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
        };
        assert!(err.is_rate_limited());
        let err = FetchError::Status {
            url: "u".to_string(),
            status: reqwest::StatusCode::NOT_FOUND,
        };
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn ohlc_request_parses_candles() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"[[1700000000000, 1.0, 1.0, 1.0], [1700003600000, 2.0, 2.5, 1.5, 2.25]]"#,
        )
        .await;
        let series = client_for(base_url).fetch_ohlc("bitcoin").await.unwrap();
        assert_eq!(series.closes(), vec![2.25]);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /coins/bitcoin/ohlc?vs_currency=usd&days=2 "));
    }

    #[tokio::test]
    async fn rate_limited_ohlc_is_a_status_error() {
        let (base_url, server) = serve_once(
            "429 Too Many Requests",
            r#"{"status": {"error_code": 429, "error_message": "slow down"}}"#,
        )
        .await;
        let err = client_for(base_url).fetch_ohlc("bitcoin").await.unwrap_err();
        assert!(err.is_rate_limited(), "{err}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_on_listing_is_a_status_error() {
        let (base_url, server) = serve_once("500 Internal Server Error", "oops").await;
        let err = client_for(base_url).fetch_top_assets().await.unwrap_err();
        match err {
            FetchError::Status { status, url } => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert!(url.ends_with("/coins/markets"));
            }
            other => panic!("expected status error, got {other}"),
        }
        let request = server.await.unwrap();
        assert!(request.contains("order=market_cap_desc"));
        assert!(request.contains("per_page=20"));
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let (base_url, server) = serve_once("200 OK", "<html>maintenance</html>").await;
        let err = client_for(base_url).fetch_ohlc("bitcoin").await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }), "{err}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_feed_is_a_transport_error() {
        let err = client_for(refused_base_url().await)
            .fetch_ohlc("bitcoin")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }), "{err}");
    }
}
