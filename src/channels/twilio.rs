//! Twilio Messages API adapter for WhatsApp delivery.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::MessageSender;
use crate::config::TwilioConfig;
use crate::error::ChannelError;

const DEFAULT_ENDPOINT: &str = "https://api.twilio.com";

/// WhatsApp message bodies above this length are rejected by the API.
pub const WHATSAPP_MAX_BODY: usize = 1600;

/// Outbound WhatsApp channel via the Twilio Messages REST API.
pub struct TwilioChannel {
    client: reqwest::Client,
    account_sid: String,
    auth_token: SecretString,
    sender_number: String,
    endpoint: String,
}

impl TwilioChannel {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            sender_number: config.sender_number.clone(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Point the channel at a different base URL (tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.endpoint, self.account_sid
        )
    }
}

/// Prefix the `whatsapp:` channel tag where absent.
fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

/// Clip a body to `max` characters, ending in an ellipsis when cut.
pub fn clip_body(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        return body.to_string();
    }
    let mut clipped: String = body.chars().take(max.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

#[async_trait]
impl MessageSender for TwilioChannel {
    async fn send(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        let form = [
            ("From", whatsapp_address(&self.sender_number)),
            ("To", whatsapp_address(to)),
            ("Body", clip_body(body, WHATSAPP_MAX_BODY)),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                channel: "whatsapp".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                channel: "whatsapp".to_string(),
                status,
                body,
            });
        }

        info!(to = %to, "Message sent");
        Ok(())
    }
}
