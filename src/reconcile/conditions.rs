//! Condition table mapping thread attributes to reactions.

use crate::chat::Reaction;
use crate::forum::Thread;
use crate::snapshot::SnapshotEntry;

/// One row of the condition table.
#[derive(Debug, Clone, Copy)]
pub struct Condition {
    pub reaction: Reaction,
    /// Receives the thread and whether the `deleted` row held.
    holds: fn(&Thread, bool) -> bool,
}

/// Evaluated in order. The first row's result gates the others.
pub const CONDITIONS: [Condition; 3] = [
    Condition {
        reaction: Reaction::Deleted,
        holds: is_deleted,
    },
    Condition {
        reaction: Reaction::Locked,
        holds: is_locked,
    },
    Condition {
        reaction: Reaction::Answered,
        holds: is_answered,
    },
];

fn is_deleted(thread: &Thread, _deleted: bool) -> bool {
    thread.is_deleted()
}

fn is_locked(thread: &Thread, deleted: bool) -> bool {
    thread.is_private && !deleted
}

fn is_answered(thread: &Thread, deleted: bool) -> bool {
    thread.is_answered && !deleted
}

/// Desired presence of each reaction, in table order.
#[must_use]
pub fn desired_reactions(thread: &Thread) -> [(Reaction, bool); 3] {
    let deleted = thread.is_deleted();
    CONDITIONS.map(|c| (c.reaction, (c.holds)(thread, deleted)))
}

/// A reaction that must be added to or removed from one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionToggle {
    /// Index into the entry's `notifications`.
    pub record: usize,
    pub reaction: Reaction,
    pub add: bool,
}

/// Toggles needed to bring every notification of `entry` to `desired`.
#[must_use]
pub fn plan_toggles(entry: &SnapshotEntry, desired: &[(Reaction, bool)]) -> Vec<ReactionToggle> {
    desired
        .iter()
        .flat_map(|&(reaction, wanted)| {
            entry
                .notifications
                .iter()
                .enumerate()
                .filter(move |(_, record)| record.has(reaction) != wanted)
                .map(move |(record, _)| ReactionToggle {
                    record,
                    reaction,
                    add: wanted,
                })
        })
        .collect()
}
