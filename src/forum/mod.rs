//! Forum side of the bridge: the thread model and the client that fetches it.

mod client;

pub use client::EdClient;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SyncError;

/// A discussion thread as returned by the forum API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Thread {
    pub id: u64,
    pub course_id: u64,
    /// Per-course sequence number shown to users as `#number`.
    pub number: u64,
    #[serde(default)]
    pub title: String,
    /// Plain-text body.
    #[serde(default)]
    pub document: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_answered: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default)]
    pub user: Option<ThreadAuthor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadAuthor {
    pub name: String,
}

impl Thread {
    #[must_use]
    pub fn key(&self) -> ThreadKey {
        ThreadKey {
            course_id: self.course_id,
            thread_id: self.id,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Display name of the author, or `None` for anonymous posts.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        if self.is_anonymous {
            return None;
        }
        self.user.as_ref().map(|u| u.name.as_str())
    }
}

/// Identity of a thread across passes: `(course_id, thread_id)`.
///
/// Serialized as `"{course_id}/{thread_id}"`, which is also the snapshot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadKey {
    pub course_id: u64,
    pub thread_id: u64,
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.course_id, self.thread_id)
    }
}

impl FromStr for ThreadKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (course, thread) = s
            .split_once('/')
            .ok_or_else(|| format!("thread key '{s}' is not of the form course/thread"))?;
        let course_id = course
            .parse()
            .map_err(|_| format!("thread key '{s}' has a non-numeric course id"))?;
        let thread_id = thread
            .parse()
            .map_err(|_| format!("thread key '{s}' has a non-numeric thread id"))?;
        Ok(Self {
            course_id,
            thread_id,
        })
    }
}

impl Serialize for ThreadKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ThreadKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Source of the current thread list for a course.
#[async_trait]
pub trait ForumSource: Send + Sync {
    /// Fetch live and soft-deleted threads, deduplicated by identity.
    ///
    /// Ordering of the result is unspecified; callers sort by `number`.
    async fn fetch_threads(&self, course_id: &str, token: &str) -> Result<Vec<Thread>, SyncError>;
}

/// Union of the live and deleted thread lists.
///
/// When both lists carry the same identity, the deleted copy wins unless only
/// the live copy has a deletion timestamp.
#[must_use]
pub fn merge_threads(live: Vec<Thread>, deleted: Vec<Thread>) -> Vec<Thread> {
    let mut merged: Vec<Thread> = Vec::with_capacity(live.len() + deleted.len());
    let mut index: HashMap<ThreadKey, usize> = HashMap::new();

    for thread in live {
        match index.get(&thread.key()) {
            Some(&i) => merged[i] = thread,
            None => {
                index.insert(thread.key(), merged.len());
                merged.push(thread);
            }
        }
    }

    for thread in deleted {
        match index.get(&thread.key()) {
            Some(&i) => {
                if !(merged[i].is_deleted() && !thread.is_deleted()) {
                    merged[i] = thread;
                }
            }
            None => {
                index.insert(thread.key(), merged.len());
                merged.push(thread);
            }
        }
    }

    merged
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn thread(id: u64, number: u64) -> Thread {
        Thread {
            id,
            course_id: 1000,
            number,
            title: format!("Thread {number}"),
            document: "Body".to_string(),
            category: "General".to_string(),
            subcategory: None,
            is_private: false,
            is_answered: false,
            is_anonymous: false,
            deleted_at: None,
            user: Some(ThreadAuthor {
                name: "Ada".to_string(),
            }),
        }
    }

    #[test]
    fn test_thread_key_round_trip() {
        let key: ThreadKey = "1000/42".parse().unwrap();
        assert_eq!(
            key,
            ThreadKey {
                course_id: 1000,
                thread_id: 42
            }
        );
        assert_eq!(key.to_string(), "1000/42");
    }

    #[test]
    fn test_thread_key_rejects_garbage() {
        assert!("1000".parse::<ThreadKey>().is_err());
        assert!("abc/42".parse::<ThreadKey>().is_err());
        assert!("1000/".parse::<ThreadKey>().is_err());
    }

    #[test]
    fn test_deserialize_ed_thread() {
        let json = r#"{
            "id": 42, "course_id": 1000, "number": 7, "title": "Help",
            "document": "How do I?", "category": "Lectures", "subcategory": "",
            "is_private": true, "is_answered": false, "is_anonymous": false,
            "deleted_at": null, "user": {"name": "Grace", "id": 5}, "vote_count": 3
        }"#;
        let thread: Thread = serde_json::from_str(json).unwrap();

        assert_eq!(thread.number, 7);
        assert_eq!(thread.subcategory, None);
        assert!(thread.is_private);
        assert_eq!(thread.author(), Some("Grace"));
    }

    #[test]
    fn test_anonymous_author_hidden() {
        let mut t = thread(1, 1);
        t.is_anonymous = true;
        assert_eq!(t.author(), None);

        t.is_anonymous = false;
        t.user = None;
        assert_eq!(t.author(), None);
    }

    #[test]
    fn test_merge_deleted_wins() {
        let live = vec![thread(1, 1), thread(2, 2)];
        let mut gone = thread(2, 2);
        gone.deleted_at = Some("2024-01-01T00:00:00Z".to_string());
        let deleted = vec![gone.clone(), {
            let mut t = thread(3, 3);
            t.deleted_at = Some("2024-01-02T00:00:00Z".to_string());
            t
        }];

        let merged = merge_threads(live, deleted);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1], gone);
        assert!(merged[2].is_deleted());
    }

    #[test]
    fn test_merge_keeps_deleted_live_copy() {
        let mut live_copy = thread(5, 5);
        live_copy.deleted_at = Some("2024-01-01T00:00:00Z".to_string());
        let merged = merge_threads(vec![live_copy.clone()], vec![thread(5, 5)]);

        assert_eq!(merged, vec![live_copy]);
    }
}
