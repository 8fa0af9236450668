//! Durable record of previously observed thread state.
//!
//! The snapshot is a JSON object keyed by `"{course_id}/{thread_id}"`. It is
//! read in full before a pass and atomically replaced after it. Every field of
//! an entry is required; a file missing any of them is rejected rather than
//! silently defaulted.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::chat::NotificationRecord;
use crate::config::{read_file, ConfigError};
use crate::error::SyncError;
use crate::forum::{Thread, ThreadKey};

/// Mutable thread attributes used for change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub is_answered: bool,
    pub is_private: bool,
    #[serde(deserialize_with = "required_nullable")]
    pub deleted_at: Option<String>,
}

impl ObservedState {
    #[must_use]
    pub fn of(thread: &Thread) -> Self {
        Self {
            is_answered: thread.is_answered,
            is_private: thread.is_private,
            deleted_at: thread.deleted_at.clone(),
        }
    }
}

/// Last-known state of one thread plus the messages posted for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: u64,
    pub number: u64,
    #[serde(flatten)]
    pub observed: ObservedState,
    /// One record per destination the thread was posted to. Append-only.
    pub notifications: Vec<NotificationRecord>,
}

impl SnapshotEntry {
    #[must_use]
    pub fn observe(thread: &Thread) -> Self {
        Self {
            id: thread.id,
            number: thread.number,
            observed: ObservedState::of(thread),
            notifications: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<ThreadKey, SnapshotEntry>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &ThreadKey) -> Option<&SnapshotEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &ThreadKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: ThreadKey, entry: SnapshotEntry) {
        self.entries.insert(key, entry);
    }

    /// Detach an entry so it can be updated and re-inserted.
    pub fn take(&mut self, key: &ThreadKey) -> Option<SnapshotEntry> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ThreadKey, &SnapshotEntry)> {
        self.entries.iter()
    }

    fn check_keys(&self) -> Result<(), String> {
        for (key, entry) in &self.entries {
            if key.thread_id != entry.id {
                return Err(format!(
                    "entry {key} carries thread id {} instead of {}",
                    entry.id, key.thread_id
                ));
            }
        }
        Ok(())
    }
}

/// File-backed snapshot persistence.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole snapshot. A missing or blank file yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn load(&self) -> Result<Snapshot, ConfigError> {
        let raw = match read_file(&self.path) {
            Ok(raw) => raw,
            Err(ConfigError::FileNotFound { .. }) => {
                debug!(path = %self.path.display(), "No snapshot file yet");
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(e),
        };
        if raw.trim().is_empty() {
            return Ok(Snapshot::new());
        }

        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        snapshot
            .check_keys()
            .map_err(|message| ConfigError::InvalidSnapshot {
                path: self.path.clone(),
                message,
            })?;

        debug!(path = %self.path.display(), entries = snapshot.len(), "Loaded snapshot");
        Ok(snapshot)
    }

    /// Replace the snapshot file with `snapshot` in one rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        let persist_err = |message: String| SyncError::Persist {
            path: self.path.clone(),
            message,
        };

        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| persist_err(e.to_string()))?;
        write_atomic(&self.path, &json).map_err(|e| persist_err(e.to_string()))?;

        debug!(path = %self.path.display(), entries = snapshot.len(), "Saved snapshot");
        Ok(())
    }
}

/// Write `contents` to a temp file beside `path`, then rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Makes an `Option` field required: `null` is accepted, a missing key is not.
fn required_nullable<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<String>::deserialize(deserializer)
}
