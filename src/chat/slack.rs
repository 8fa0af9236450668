use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{ChatSink, Delivery, NotificationRecord, Reaction, RenderedMessage};
use crate::config::{ApiEndpoints, SlackOAuthConfig};
use crate::constants::USER_AGENT;
use crate::error::{ChatError, PostError};

/// Envelope shared by all Web API responses.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

/// Bot-token client for the chat Web API.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_url: String,
    auth_token: String,
}

impl SlackClient {
    /// Create a client authenticating with a bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoints: &ApiEndpoints, auth_token: &str) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(endpoints.http_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_url: endpoints.slack_api_url.clone(),
            auth_token: auth_token.to_string(),
        })
    }

    async fn call(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<(StatusCode, Option<ApiResponse>), ChatError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_url))
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        // A body that fails to parse is treated like a refusal, not a transport error.
        let parsed = response.json::<ApiResponse>().await.ok();
        Ok((status, parsed))
    }
}

#[async_trait]
impl ChatSink for SlackClient {
    async fn post_message(
        &self,
        destination: &str,
        message: &RenderedMessage,
    ) -> Result<Delivery, PostError> {
        let body = json!({
            "channel": destination,
            "text": message.fallback_text(),
            "blocks": message.blocks(),
        });
        let fail = |kind: ChatError| PostError {
            destination: destination.to_string(),
            kind,
        };

        let (status, parsed) = self.call("chat.postMessage", &body).await.map_err(fail)?;

        let response = match parsed {
            Some(r) if status.is_success() => r,
            _ => return Err(fail(ChatError::rejected(format!("HTTP {status}")))),
        };
        if !response.ok {
            let reason = response.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(fail(ChatError::rejected(reason)));
        }

        let Some(ts) = response.ts else {
            return Err(fail(ChatError::rejected("response carried no message timestamp")));
        };
        let channel = response.channel.unwrap_or_else(|| destination.to_string());

        debug!(channel = %channel, ts = %ts, "Posted notification");
        Ok(Delivery::Tracked(NotificationRecord::new(channel, ts)))
    }

    async fn set_reaction(
        &self,
        record: &NotificationRecord,
        reaction: Reaction,
        add: bool,
    ) -> Result<bool, ChatError> {
        let method = if add { "reactions.add" } else { "reactions.remove" };
        let body = json!({
            "channel": record.channel,
            "name": reaction.emoji(),
            "timestamp": record.ts,
        });

        let (status, parsed) = self.call(method, &body).await?;

        let Some(response) = parsed.filter(|_| status == StatusCode::OK) else {
            warn!(channel = %record.channel, reaction = %reaction, status = %status, "Reaction call refused");
            return Ok(false);
        };
        if response.ok {
            return Ok(true);
        }

        match (add, response.error.as_deref()) {
            (true, Some("already_reacted")) | (false, Some("no_reaction")) => Ok(true),
            (_, error) => {
                warn!(
                    channel = %record.channel,
                    reaction = %reaction,
                    error = error.unwrap_or("unknown"),
                    "Reaction call refused"
                );
                Ok(false)
            }
        }
    }
}

/// Outcome of an OAuth code exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OAuthExchange {
    pub status: StatusCode,
    pub ok: bool,
}

/// Exchange an OAuth `code` for an installation via `oauth.v2.access`.
///
/// # Errors
///
/// Returns an error if the chat service cannot be reached.
pub async fn exchange_oauth_code(
    http: &reqwest::Client,
    api_url: &str,
    oauth: &SlackOAuthConfig,
    code: &str,
) -> Result<OAuthExchange, ChatError> {
    let form = [
        ("client_id", oauth.client_id.as_str()),
        ("client_secret", oauth.client_secret.as_str()),
        ("code", code),
        ("redirect_uri", oauth.redirect_uri.as_str()),
    ];

    let response = http
        .post(format!("{api_url}/oauth.v2.access"))
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    let ok = response
        .json::<ApiResponse>()
        .await
        .map(|r| r.ok)
        .unwrap_or(false);

    debug!(status = %status, ok, "Exchanged OAuth code");
    Ok(OAuthExchange { status, ok })
}
