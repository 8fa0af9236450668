use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{ChatSink, Delivery, NotificationRecord, Reaction, RenderedMessage};
use crate::config::ApiEndpoints;
use crate::constants::USER_AGENT;
use crate::error::{ChatError, PostError};

/// Incoming-webhook client. Posts are fire-and-forget, so reactions are unsupported.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
}

impl WebhookClient {
    /// Create a client posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoints: &ApiEndpoints, url: &str) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(endpoints.http_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ChatSink for WebhookClient {
    async fn post_message(
        &self,
        destination: &str,
        message: &RenderedMessage,
    ) -> Result<Delivery, PostError> {
        let fail = |kind: ChatError| PostError {
            destination: destination.to_string(),
            kind,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&json!({
                "text": message.fallback_text(),
                "blocks": message.blocks(),
            }))
            .send()
            .await
            .map_err(|e| fail(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(fail(ChatError::rejected(format!("HTTP {status}: {body}"))));
        }

        debug!(title = %message.title, "Posted notification via webhook");
        Ok(Delivery::Untracked)
    }

    async fn set_reaction(
        &self,
        record: &NotificationRecord,
        reaction: Reaction,
        _add: bool,
    ) -> Result<bool, ChatError> {
        debug!(channel = %record.channel, reaction = %reaction, "Webhook mode cannot react to messages");
        Ok(false)
    }
}
