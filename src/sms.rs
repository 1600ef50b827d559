//! Outbound SMS delivery for login codes.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Config, SmsProvider};

#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("SMS gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("SMS gateway rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Something that can deliver a text message to a phone number.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError>;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        info!(to, body, "SMS (log provider, not delivered)");
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    to: &'a str,
    from: Option<&'a str>,
    body: &'a str,
}

/// Posts `{to, from, body}` JSON to a gateway with a bearer API key.
pub struct HttpSmsSender {
    client: reqwest::Client,
    url: String,
    api_key: String,
    sender: Option<String>,
}

impl HttpSmsSender {
    pub fn new(url: String, api_key: String, sender: Option<String>) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("storefront/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
            sender,
        })
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&OutboundMessage {
                to,
                from: self.sender.as_deref(),
                body,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SmsError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        debug!(to, status = status.as_u16(), "SMS accepted by gateway");
        Ok(())
    }
}

/// Build the sender selected by `SMS_PROVIDER`.
pub fn from_config(config: &Config) -> anyhow::Result<Box<dyn SmsSender>> {
    match config.sms_provider {
        SmsProvider::Log => Ok(Box::new(LogSmsSender)),
        SmsProvider::Http => {
            let url = config
                .sms_api_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("SMS_API_URL is not set"))?;
            let api_key = config
                .sms_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("SMS_API_KEY is not set"))?;
            Ok(Box::new(HttpSmsSender::new(
                url,
                api_key,
                config.sms_sender.clone(),
            )?))
        }
    }
}
