use crate::config::SmsConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Outbound text messages through an HTTP SMS gateway.
#[derive(Debug, Clone)]
pub struct SmsService {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    from_number: String,
}

#[derive(Debug, Serialize)]
struct OutboundSms<'a> {
    from: &'a str,
    to: &'a str,
    message: &'a str,
}

impl SmsService {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            from_number: config.from_number.clone(),
        }
    }

    /// Hand a message to the gateway. Returns whether it was accepted.
    pub async fn send(&self, to: &str, message: &str) -> Result<bool, SmsError> {
        let response = self
            .client
            .post(&self.gateway_url)
            .bearer_auth(&self.api_key)
            .json(&OutboundSms {
                from: &self.from_number,
                to,
                message,
            })
            .send()
            .await?;

        let delivered = response.status().is_success();
        if delivered {
            info!(%to, "sms accepted by gateway");
        } else {
            warn!(%to, status = %response.status(), "sms rejected by gateway");
        }
        Ok(delivered)
    }
}
