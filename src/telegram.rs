use crate::config::TelegramConfig;
use crate::error::NotifyError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outbound alert channel. One attempt per call, no retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize, Debug)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize, Debug, Default)]
struct ApiReply {
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    http: Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// `None` when the token or chat id is missing.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>> {
        let Some((token, chat_id)) = config.credentials() else {
            return Ok(None);
        };
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            http,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base_url.trim_end_matches('/'),
                token
            ),
            chat_id: chat_id.to_string(),
        }))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reply: ApiReply = response.json().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status,
            description: reply.description.unwrap_or_else(|| "no description".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coingecko::tests::{refused_base_url, serve_once};

    #[test]
    fn missing_credentials_disable_notifier() {
        let config = TelegramConfig::default();
        assert!(TelegramNotifier::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn endpoint_embeds_token() {
        let config = TelegramConfig {
            api_base_url: "https://api.telegram.org/".to_string(),
            bot_token: Some("123:abc".to_string()),
            chat_id: Some("42".to_string()),
            ..TelegramConfig::default()
        };
        let notifier = TelegramNotifier::from_config(&config).unwrap().unwrap();
        assert_eq!(notifier.endpoint, "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(notifier.chat_id, "42");
    }

    #[test]
    fn payload_uses_markdown() {
        let payload = SendMessage {
            chat_id: "42",
            text: "*hi*",
            parse_mode: "Markdown",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"chat_id": "42", "text": "*hi*", "parse_mode": "Markdown"})
        );
    }

    fn notifier_for(base_url: String) -> TelegramNotifier {
        let config = TelegramConfig {
            api_base_url: base_url,
            bot_token: Some("123:secret".to_string()),
            chat_id: Some("42".to_string()),
            timeout_secs: 5,
        };
        TelegramNotifier::from_config(&config).unwrap().unwrap()
    }

    #[tokio::test]
    async fn delivered_message_posts_markdown_payload() {
        let (base_url, server) = serve_once("200 OK", r#"{"ok": true, "result": {}}"#).await;
        notifier_for(base_url).send("*hello*").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /bot123:secret/sendMessage "));
        assert!(request.contains(r#""parse_mode":"Markdown""#));
        assert!(request.contains(r#""chat_id":"42""#));
    }

    #[tokio::test]
    async fn rejected_message_carries_api_description() {
        let (base_url, server) = serve_once(
            "400 Bad Request",
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#,
        )
        .await;
        let err = notifier_for(base_url).send("hi").await.unwrap_err();
        match err {
            NotifyError::Rejected {
                status,
                description,
            } => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert_eq!(description, "Bad Request: chat not found");
            }
            other => panic!("expected rejection, got {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_without_json_is_still_a_rejection() {
        let (base_url, server) = serve_once("500 Internal Server Error", "oops").await;
        let err = notifier_for(base_url).send("hi").await.unwrap_err();
        assert!(
            matches!(&err, NotifyError::Rejected { description, .. } if description == "no description"),
            "{err}"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_api_is_a_transport_error_without_token() {
        let err = notifier_for(refused_base_url().await)
            .send("hi")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)), "{err}");
        assert!(!err.to_string().contains("secret"));
        assert!(!format!("{err:?}").contains("secret"));
    }
}
