use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::reconcile::{ActionRecord, ChatAction, PassMode, Reconciliation};

/// Summary of one completed pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: PassMode,
    pub threads_seen: usize,
    pub new_threads: usize,
    pub actions: Vec<ActionRecord>,
}

impl PassReport {
    pub(crate) fn new(
        started_at: DateTime<Utc>,
        mode: PassMode,
        reconciliation: &Reconciliation,
    ) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            mode,
            threads_seen: reconciliation.threads_seen,
            new_threads: reconciliation.new_threads,
            actions: reconciliation.actions.clone(),
        }
    }

    /// Actions that did not take effect and will be retried or dropped.
    pub fn failures(&self) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter().filter(|a| a.outcome.is_failure())
    }

    #[must_use]
    pub fn posts_sent(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.action, ChatAction::Post { .. }) && !a.outcome.is_failure())
            .count()
    }

    #[must_use]
    pub fn reactions_changed(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.action, ChatAction::React { .. }) && !a.outcome.is_failure())
            .count()
    }

    pub(crate) fn log(&self) {
        for failure in self.failures() {
            warn!(
                thread = %failure.thread,
                number = failure.number,
                action = %failure.action,
                outcome = ?failure.outcome,
                "Chat action did not take effect"
            );
        }

        let elapsed_ms = (self.finished_at - self.started_at).num_milliseconds();
        info!(
            mode = ?self.mode,
            threads = self.threads_seen,
            new_threads = self.new_threads,
            posts = self.posts_sent(),
            reactions = self.reactions_changed(),
            failures = self.failures().count(),
            elapsed_ms,
            "Pass complete"
        );
    }
}
