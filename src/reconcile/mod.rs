//! State reconciliation between the forum and the chat workspace.
//!
//! For every thread, in the order given, the engine:
//!
//! 1. looks the thread up in the snapshot; unseen threads get an entry and,
//!    outside bootstrap, one post per destination,
//! 2. evaluates the condition table against the current thread attributes,
//! 3. toggles reactions on every notification whose reaction set disagrees,
//! 4. overwrites the entry's observed attributes.
//!
//! Chat calls are issued as they are decided, so a record created by a post
//! is visible to the reaction step of the same thread. Only calls that
//! succeeded change the snapshot; anything refused is planned again on the
//! next pass because the mismatch persists.

mod conditions;

pub use conditions::{desired_reactions, plan_toggles, Condition, ReactionToggle, CONDITIONS};

use std::fmt;

use tracing::{debug, info, warn};

use crate::chat::{render_thread, ChatSink, Delivery, Reaction};
use crate::forum::{Thread, ThreadKey};
use crate::snapshot::{ObservedState, Snapshot, SnapshotEntry};

/// Whether unseen threads are announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// First pass against an empty snapshot: record threads without posting.
    Bootstrap,
    Notify,
}

impl PassMode {
    #[must_use]
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        if snapshot.is_empty() {
            Self::Bootstrap
        } else {
            Self::Notify
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    Post {
        destination: String,
    },
    React {
        channel: String,
        ts: String,
        reaction: Reaction,
        add: bool,
    },
}

impl fmt::Display for ChatAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post { destination } => write!(f, "post to {destination}"),
            Self::React {
                channel,
                reaction,
                add: true,
                ..
            } => write!(f, "add {reaction} in {channel}"),
            Self::React {
                channel,
                reaction,
                add: false,
                ..
            } => write!(f, "remove {reaction} in {channel}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// The chat service answered but refused; retried on the next pass.
    Rejected(String),
    /// The call never completed. A failed reaction call also skips the rest of
    /// the thread's reaction toggles.
    TransportFailed(String),
}

impl ActionOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Applied)
    }
}

/// One chat call made during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub thread: ThreadKey,
    pub number: u64,
    pub action: ChatAction,
    pub outcome: ActionOutcome,
}

/// Result of reconciling one thread list.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub snapshot: Snapshot,
    /// Every chat call made, in order.
    pub actions: Vec<ActionRecord>,
    pub threads_seen: usize,
    pub new_threads: usize,
}

/// Drives chat calls for a thread list against a snapshot.
pub struct Reconciler<'a> {
    chat: &'a dyn ChatSink,
    destinations: &'a [String],
    web_url: &'a str,
    mode: PassMode,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        chat: &'a dyn ChatSink,
        destinations: &'a [String],
        web_url: &'a str,
        mode: PassMode,
    ) -> Self {
        Self {
            chat,
            destinations,
            web_url,
            mode,
        }
    }

    /// Reconcile `threads` (expected in ascending `number` order) against `snapshot`.
    pub async fn run(&self, mut snapshot: Snapshot, threads: &[Thread]) -> Reconciliation {
        let mut actions = Vec::new();
        let mut new_threads = 0;

        for thread in threads {
            let key = thread.key();
            let existing = snapshot.take(&key);
            if existing.is_none() {
                new_threads += 1;
            }
            let entry = self.reconcile_thread(thread, existing, &mut actions).await;
            snapshot.insert(key, entry);
        }

        if self.mode == PassMode::Bootstrap {
            info!(
                threads = threads.len(),
                "Snapshot was empty: recorded threads without sending notifications"
            );
        }

        Reconciliation {
            snapshot,
            actions,
            threads_seen: threads.len(),
            new_threads,
        }
    }

    async fn reconcile_thread(
        &self,
        thread: &Thread,
        existing: Option<SnapshotEntry>,
        actions: &mut Vec<ActionRecord>,
    ) -> SnapshotEntry {
        let mut log = ActionLog {
            thread: thread.key(),
            number: thread.number,
            actions,
        };

        let mut entry = match existing {
            Some(entry) => entry,
            None => {
                debug!(thread = %thread.key(), number = thread.number, "New thread");
                let mut entry = SnapshotEntry::observe(thread);
                if self.mode == PassMode::Notify {
                    self.post(thread, &mut entry, &mut log).await;
                }
                entry
            }
        };

        self.sync_reactions(thread, &mut entry, &mut log).await;
        finish(entry, thread)
    }

    async fn post(
        &self,
        thread: &Thread,
        entry: &mut SnapshotEntry,
        log: &mut ActionLog<'_>,
    ) {
        let message = render_thread(thread, self.web_url);

        for destination in self.destinations {
            let action = ChatAction::Post {
                destination: destination.clone(),
            };
            let result = self.chat.post_message(destination, &message).await;
            match result {
                Ok(Delivery::Tracked(record)) => {
                    entry.notifications.push(record);
                    log.push(action, ActionOutcome::Applied);
                }
                Ok(Delivery::Untracked) => log.push(action, ActionOutcome::Applied),
                // Remaining destinations still get the post.
                Err(e) if e.kind.is_transport() => {
                    log.push(action, ActionOutcome::TransportFailed(e.kind.to_string()));
                }
                Err(e) => log.push(action, ActionOutcome::Rejected(e.kind.to_string())),
            }
        }
    }

    async fn sync_reactions(
        &self,
        thread: &Thread,
        entry: &mut SnapshotEntry,
        log: &mut ActionLog<'_>,
    ) {
        let toggles = plan_toggles(entry, &desired_reactions(thread));

        for toggle in toggles {
            let record = &entry.notifications[toggle.record];
            let action = ChatAction::React {
                channel: record.channel.clone(),
                ts: record.ts.clone(),
                reaction: toggle.reaction,
                add: toggle.add,
            };

            let result = self
                .chat
                .set_reaction(record, toggle.reaction, toggle.add)
                .await;

            match result {
                Ok(true) => {
                    let reactions = &mut entry.notifications[toggle.record].reactions;
                    if toggle.add {
                        reactions.insert(toggle.reaction);
                    } else {
                        reactions.remove(&toggle.reaction);
                    }
                    log.push(action, ActionOutcome::Applied);
                }
                Ok(false) => log.push(
                    action,
                    ActionOutcome::Rejected("negative acknowledgement".to_string()),
                ),
                Err(e) => {
                    // The rest of this thread waits for the next pass.
                    log.push(action, ActionOutcome::TransportFailed(e.to_string()));
                    return;
                }
            }
        }
    }
}

/// Appends actions for a single thread.
struct ActionLog<'a> {
    thread: ThreadKey,
    number: u64,
    actions: &'a mut Vec<ActionRecord>,
}

impl ActionLog<'_> {
    fn push(&mut self, action: ChatAction, outcome: ActionOutcome) {
        match &outcome {
            ActionOutcome::Applied => debug!(
                thread = %self.thread,
                number = self.number,
                action = %action,
                "Chat action applied"
            ),
            ActionOutcome::Rejected(reason) | ActionOutcome::TransportFailed(reason) => warn!(
                thread = %self.thread,
                number = self.number,
                action = %action,
                reason = %reason,
                "Chat action failed"
            ),
        }
        self.actions.push(ActionRecord {
            thread: self.thread,
            number: self.number,
            action,
            outcome,
        });
    }
}

fn finish(mut entry: SnapshotEntry, thread: &Thread) -> SnapshotEntry {
    entry.number = thread.number;
    entry.observed = ObservedState::of(thread);
    entry
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::chat::{NotificationRecord, RenderedMessage};
    use crate::error::{ChatError, PostError};
    use crate::forum::tests::thread;

    /// In-memory chat service recording every call.
    #[derive(Default)]
    struct FakeChat {
        calls: Mutex<Vec<String>>,
        rejected_destinations: HashSet<String>,
        unreachable_destinations: HashSet<String>,
        reject_reactions: bool,
        unreachable_reactions: bool,
        next_ts: AtomicU64,
    }

    impl FakeChat {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    fn unreachable() -> ChatError {
        ChatError::Transport(Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }

    #[async_trait]
    impl ChatSink for FakeChat {
        async fn post_message(
            &self,
            destination: &str,
            message: &RenderedMessage,
        ) -> Result<Delivery, PostError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("post {destination} {}", message.title));

            let fail = |kind| PostError {
                destination: destination.to_string(),
                kind,
            };
            if self.rejected_destinations.contains(destination) {
                return Err(fail(ChatError::rejected("channel_not_found")));
            }
            if self.unreachable_destinations.contains(destination) {
                return Err(fail(unreachable()));
            }
            let ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
            Ok(Delivery::Tracked(NotificationRecord::new(
                destination,
                format!("{ts}.0"),
            )))
        }

        async fn set_reaction(
            &self,
            record: &NotificationRecord,
            reaction: Reaction,
            add: bool,
        ) -> Result<bool, ChatError> {
            let verb = if add { "add" } else { "remove" };
            self.calls
                .lock()
                .unwrap()
                .push(format!("{verb} {} {}", reaction.emoji(), record.channel));

            if self.unreachable_reactions {
                return Err(unreachable());
            }
            Ok(!self.reject_reactions)
        }
    }

    fn destinations() -> Vec<String> {
        vec!["C1".to_string(), "C2".to_string()]
    }

    async fn run(
        chat: &FakeChat,
        snapshot: Snapshot,
        threads: &[Thread],
        mode: PassMode,
    ) -> Reconciliation {
        let dest = destinations();
        Reconciler::new(chat, &dest, "https://edstem.org/us", mode)
            .run(snapshot, threads)
            .await
    }

    /// Snapshot where `threads` were already announced to both destinations.
    async fn announced(chat: &FakeChat, threads: &[Thread]) -> Snapshot {
        let result = run(chat, Snapshot::new(), threads, PassMode::Notify).await;
        chat.clear();
        result.snapshot
    }

    #[tokio::test]
    async fn test_bootstrap_records_without_posting() {
        let chat = FakeChat::default();
        let threads = vec![thread(1, 1), thread(2, 2)];

        let first = run(&chat, Snapshot::new(), &threads, PassMode::Bootstrap).await;
        assert!(chat.calls().is_empty());
        assert_eq!(first.snapshot.len(), 2);
        assert_eq!(first.new_threads, 2);
        assert!(first
            .snapshot
            .iter()
            .all(|(_, e)| e.notifications.is_empty()));

        let mode = PassMode::for_snapshot(&first.snapshot);
        let second = run(&chat, first.snapshot, &threads, mode).await;
        assert!(chat.calls().is_empty());
        assert!(second.actions.is_empty());
        assert_eq!(second.new_threads, 0);
    }

    #[tokio::test]
    async fn test_new_thread_posted_to_every_destination() {
        let chat = FakeChat::default();
        let snapshot = announced(&chat, &[]).await;

        let result = run(&chat, snapshot, &[thread(42, 7)], PassMode::Notify).await;

        assert_eq!(
            chat.calls(),
            vec!["post C1 (#7) Thread 7", "post C2 (#7) Thread 7"]
        );
        let entry = result.snapshot.get(&thread(42, 7).key()).unwrap();
        assert_eq!(entry.notifications.len(), 2);
        assert_eq!(entry.notifications[1].channel, "C2");
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let chat = FakeChat::default();
        let snapshot = announced(&chat, &[]).await;
        let mut answered = thread(43, 8);
        answered.is_answered = true;
        let threads = vec![thread(42, 7), answered];

        let first = run(&chat, snapshot, &threads, PassMode::Notify).await;
        assert_eq!(first.actions.len(), 6);
        chat.clear();

        let second = run(&chat, first.snapshot, &threads, PassMode::Notify).await;
        assert!(second.actions.is_empty());
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_answered_transition_adds_one_reaction_per_record() {
        let chat = FakeChat::default();
        let mut t = thread(42, 7);
        let snapshot = announced(&chat, &[t.clone()]).await;

        t.is_answered = true;
        let second = run(&chat, snapshot, &[t.clone()], PassMode::Notify).await;
        assert_eq!(
            chat.calls(),
            vec!["add white_check_mark C1", "add white_check_mark C2"]
        );
        let entry = second.snapshot.get(&t.key()).unwrap();
        assert!(entry.observed.is_answered);
        assert!(entry
            .notifications
            .iter()
            .all(|r| r.has(Reaction::Answered)));
        chat.clear();

        let third = run(&chat, second.snapshot, &[t], PassMode::Notify).await;
        assert!(third.actions.is_empty());
    }

    #[tokio::test]
    async fn test_deletion_removes_locked_and_answered() {
        let chat = FakeChat::default();
        let mut t = thread(42, 7);
        t.is_private = true;
        t.is_answered = true;
        let snapshot = announced(&chat, &[t.clone()]).await;
        let entry = snapshot.get(&t.key()).unwrap();
        assert!(entry.notifications[0].has(Reaction::Locked));
        assert!(entry.notifications[0].has(Reaction::Answered));

        t.deleted_at = Some("2024-03-01T10:00:00Z".to_string());
        let result = run(&chat, snapshot, &[t.clone()], PassMode::Notify).await;

        assert_eq!(
            chat.calls(),
            vec![
                "add x C1",
                "add x C2",
                "remove lock C1",
                "remove lock C2",
                "remove white_check_mark C1",
                "remove white_check_mark C2",
            ]
        );
        let entry = result.snapshot.get(&t.key()).unwrap();
        for record in &entry.notifications {
            let applied: Vec<Reaction> = record.reactions.iter().copied().collect();
            assert_eq!(applied, vec![Reaction::Deleted]);
        }
    }

    #[tokio::test]
    async fn test_partial_post_failure_keeps_successful_record() {
        let chat = FakeChat {
            rejected_destinations: HashSet::from(["C1".to_string()]),
            ..FakeChat::default()
        };
        let snapshot = announced(&chat, &[]).await;
        let t = thread(42, 7);

        let first = run(&chat, snapshot, &[t.clone()], PassMode::Notify).await;
        let entry = first.snapshot.get(&t.key()).unwrap();
        assert_eq!(entry.notifications.len(), 1);
        assert_eq!(entry.notifications[0].channel, "C2");
        assert!(matches!(
            first.actions[0].outcome,
            ActionOutcome::Rejected(_)
        ));
        chat.clear();

        let second = run(&chat, first.snapshot, &[t], PassMode::Notify).await;
        assert!(second.actions.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_reaction_retried_next_pass() {
        let mut chat = FakeChat::default();
        let mut t = thread(42, 7);
        let snapshot = announced(&chat, &[t.clone()]).await;

        chat.reject_reactions = true;
        t.is_answered = true;
        let second = run(&chat, snapshot, &[t.clone()], PassMode::Notify).await;
        assert_eq!(second.actions.len(), 2);
        assert!(second.actions.iter().all(|a| a.outcome.is_failure()));
        let entry = second.snapshot.get(&t.key()).unwrap();
        assert!(entry.observed.is_answered);
        assert!(!entry.notifications[0].has(Reaction::Answered));

        chat.reject_reactions = false;
        chat.clear();
        let third = run(&chat, second.snapshot, &[t], PassMode::Notify).await;
        assert_eq!(
            chat.calls(),
            vec!["add white_check_mark C1", "add white_check_mark C2"]
        );
        assert!(third.actions.iter().all(|a| !a.outcome.is_failure()));
    }

    #[tokio::test]
    async fn test_transport_failure_skips_rest_of_thread_only() {
        let mut chat = FakeChat::default();
        let mut a = thread(42, 7);
        let mut b = thread(43, 8);
        let snapshot = announced(&chat, &[a.clone(), b.clone()]).await;

        chat.unreachable_reactions = true;
        a.is_answered = true;
        b.is_private = true;
        let result = run(&chat, snapshot, &[a.clone(), b.clone()], PassMode::Notify).await;

        assert_eq!(chat.calls(), vec!["add white_check_mark C1", "add lock C1"]);
        assert_eq!(result.actions.len(), 2);
        assert!(matches!(
            result.actions[1].outcome,
            ActionOutcome::TransportFailed(_)
        ));
        assert_eq!(result.actions[1].thread, b.key());
        assert!(result.snapshot.get(&b.key()).unwrap().observed.is_private);
    }

    #[tokio::test]
    async fn test_unreachable_destination_does_not_block_others() {
        let chat = FakeChat {
            unreachable_destinations: HashSet::from(["C1".to_string()]),
            ..FakeChat::default()
        };
        let snapshot = announced(&chat, &[]).await;
        let mut t = thread(42, 7);
        t.is_answered = true;

        let first = run(&chat, snapshot, &[t.clone()], PassMode::Notify).await;

        assert_eq!(
            chat.calls(),
            vec![
                "post C1 (#7) Thread 7",
                "post C2 (#7) Thread 7",
                "add white_check_mark C2"
            ]
        );
        assert!(matches!(
            first.actions[0].outcome,
            ActionOutcome::TransportFailed(_)
        ));
        let entry = first.snapshot.get(&t.key()).unwrap();
        assert_eq!(entry.notifications.len(), 1);
        assert_eq!(entry.notifications[0].channel, "C2");
        assert!(entry.notifications[0].has(Reaction::Answered));
        chat.clear();

        let second = run(&chat, first.snapshot, &[t], PassMode::Notify).await;
        assert!(chat.calls().is_empty());
        assert!(second.actions.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrapped_thread_answered_later_has_no_records() {
        let chat = FakeChat::default();
        let mut t = thread(42, 7);

        let first = run(&chat, Snapshot::new(), &[t.clone()], PassMode::Bootstrap).await;
        let entry = first.snapshot.get(&t.key()).unwrap();
        assert!(!entry.observed.is_answered);
        assert!(entry.observed.deleted_at.is_none());

        t.is_answered = true;
        let second = run(&chat, first.snapshot, &[t.clone()], PassMode::Notify).await;
        assert!(second.actions.is_empty());
        assert!(second.snapshot.get(&t.key()).unwrap().observed.is_answered);
    }

    #[tokio::test]
    async fn test_posts_follow_input_order() {
        let chat = FakeChat::default();
        let snapshot = announced(&chat, &[]).await;
        let dest = vec!["C1".to_string()];

        Reconciler::new(&chat, &dest, "https://x", PassMode::Notify)
            .run(snapshot, &[thread(10, 1), thread(5, 2), thread(7, 3)])
            .await;

        assert_eq!(
            chat.calls(),
            vec![
                "post C1 (#1) Thread 1",
                "post C1 (#2) Thread 2",
                "post C1 (#3) Thread 3",
            ]
        );
    }
}
