//! Orchestration of notifier passes.
//!
//! A pass loads the snapshot, fetches the course's threads, reconciles them
//! against chat and writes the snapshot back. Fatal errors return before the
//! write; chat failures do not, so whatever was applied is kept.

mod report;

pub use report::PassReport;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::chat::{ChatSink, SlackClient, WebhookClient};
use crate::config::{ChatMode, Config};
use crate::error::{Service, SyncError};
use crate::forum::{EdClient, ForumSource};
use crate::reconcile::{PassMode, Reconciler};
use crate::snapshot::SnapshotStore;
use crate::tokens::TokenStore;

/// Runs passes for one course. Passes must not overlap for the same snapshot.
pub struct Notifier {
    config: Config,
    forum: Arc<dyn ForumSource>,
    chat: Arc<dyn ChatSink>,
    tokens: TokenStore,
    snapshots: SnapshotStore,
}

impl Notifier {
    #[must_use]
    pub fn new(config: Config, forum: Arc<dyn ForumSource>, chat: Arc<dyn ChatSink>) -> Self {
        let tokens = TokenStore::new(&config.token_path);
        let snapshots = SnapshotStore::new(&config.snapshot_path);
        Self {
            config,
            forum,
            chat,
            tokens,
            snapshots,
        }
    }

    /// Build a notifier with HTTP clients for the configured services.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: Config) -> Result<Self, SyncError> {
        let forum = EdClient::new(&config.endpoints, config.thread_limit)?;
        let chat: Arc<dyn ChatSink> = match &config.chat {
            ChatMode::Bot { auth_token, .. } => Arc::new(
                SlackClient::new(&config.endpoints, auth_token).map_err(chat_setup)?,
            ),
            ChatMode::Webhook { url } => {
                Arc::new(WebhookClient::new(&config.endpoints, url).map_err(chat_setup)?)
            }
        };
        Ok(Self::new(config, Arc::new(forum), chat))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one fetch-reconcile-persist pass.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration, snapshot or token cannot be read,
    /// the forum rejects or cannot serve the request, or the snapshot cannot
    /// be written. Chat failures are reported in the [`PassReport`] instead.
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        let started_at = Utc::now();
        let course_id = &self.config.course_id;

        let snapshot = self.snapshots.load()?;
        let mode = PassMode::for_snapshot(&snapshot);
        let token = self.tokens.token_for(course_id)?;
        debug!(course_id = %course_id, entries = snapshot.len(), mode = ?mode, "Starting pass");

        let mut threads = self.forum.fetch_threads(course_id, &token).await?;
        threads.sort_by_key(|t| (t.number, t.id));

        let destinations = self.config.destinations();
        let reconciliation = Reconciler::new(
            self.chat.as_ref(),
            &destinations,
            &self.config.endpoints.ed_web_url,
            mode,
        )
        .run(snapshot, &threads)
        .await;

        self.snapshots.save(&reconciliation.snapshot)?;

        let report = PassReport::new(started_at, mode, &reconciliation);
        report.log();
        Ok(report)
    }
}

/// Run passes forever, one at a time, `interval` apart.
pub async fn poll_loop(notifier: &Notifier, interval: Duration) {
    info!(
        course_id = %notifier.config().course_id,
        interval_secs = interval.as_secs(),
        "Starting poll loop"
    );

    loop {
        if let Err(e) = notifier.run_pass().await {
            error!("Pass failed: {e:#}");
        }
        tokio::time::sleep(interval).await;
    }
}

fn chat_setup(e: crate::error::ChatError) -> SyncError {
    SyncError::ClientSetup {
        service: Service::Chat,
        message: e.to_string(),
    }
}
