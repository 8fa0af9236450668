//! Chat side of the bridge: notification records and the clients that post them.

pub mod render;
mod slack;
mod webhook;

pub use render::{render_thread, RenderedMessage};
pub use slack::{exchange_oauth_code, OAuthExchange, SlackClient};
pub use webhook::WebhookClient;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, PostError};

/// Reaction labels mirrored onto notification messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Deleted,
    Locked,
    Answered,
}

impl Reaction {
    /// Emoji name used with the chat reactions API.
    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            Self::Deleted => "x",
            Self::Locked => "lock",
            Self::Answered => "white_check_mark",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Locked => "locked",
            Self::Answered => "answered",
        }
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One chat message posted for a thread.
///
/// Created when a post succeeds; afterwards only `reactions` changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub channel: String,
    /// Chat message timestamp, which doubles as the message identifier.
    pub ts: String,
    /// Reactions currently applied to the message.
    pub reactions: BTreeSet<Reaction>,
}

impl NotificationRecord {
    #[must_use]
    pub fn new(channel: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ts: ts.into(),
            reactions: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn has(&self, reaction: Reaction) -> bool {
        self.reactions.contains(&reaction)
    }
}

/// Result of a successful post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The service returned a message identifier that reactions can target.
    Tracked(NotificationRecord),
    /// Delivered without an identifier (incoming webhooks).
    Untracked,
}

/// Client capable of posting notifications and toggling reactions.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Post a rendered message to one destination.
    async fn post_message(
        &self,
        destination: &str,
        message: &RenderedMessage,
    ) -> Result<Delivery, PostError>;

    /// Add or remove `reaction` on the message behind `record`.
    ///
    /// Returns `Ok(true)` when the message ends up in the requested state and
    /// `Ok(false)` when the service refused. Only transport failures are errors.
    async fn set_reaction(
        &self,
        record: &NotificationRecord,
        reaction: Reaction,
        add: bool,
    ) -> Result<bool, ChatError>;
}
