//! Error taxonomy for a notifier pass.
//!
//! Fatal errors ([`SyncError`]) abort the pass before the snapshot is written.
//! Chat-side failures ([`ChatError`], [`PostError`]) are recorded per item and
//! never abort the pass.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Remote service an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Forum,
    Chat,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forum => f.write_str("forum"),
            Self::Chat => f.write_str("chat"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("forum rejected token for course {course_id} (status {status})")]
    Auth { course_id: String, status: u16 },
    #[error("transport failure talking to {service}: {source}")]
    Transport {
        service: Service,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned an unreadable response: {message}")]
    Malformed { service: Service, message: String },
    #[error("failed to build {service} client: {message}")]
    ClientSetup { service: Service, message: String },
    #[error("failed to persist {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },
}

impl SyncError {
    pub(crate) fn forum_transport(source: reqwest::Error) -> Self {
        Self::Transport {
            service: Service::Forum,
            source,
        }
    }
}

/// Failure of a single chat API call.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request never produced a usable HTTP response.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The chat service answered but refused the request.
    #[error("rejected: {reason}")]
    Rejected { reason: String },
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}

impl ChatError {
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// A post to one destination failed. Other destinations are unaffected.
#[derive(Debug, Error)]
#[error("post to {destination} failed: {kind}")]
pub struct PostError {
    pub destination: String,
    #[source]
    pub kind: ChatError,
}
