//! Durable per-course forum tokens.
//!
//! Stored as a JSON object mapping course id to `x-token`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{read_json_file, ConfigError};
use crate::error::SyncError;
use crate::snapshot::write_atomic;

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the token for `course_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed, or has no entry for the course.
    pub fn token_for(&self, course_id: &str) -> Result<String, ConfigError> {
        let mut tokens: BTreeMap<String, String> = read_json_file(&self.path)?;
        tokens
            .remove(course_id)
            .ok_or_else(|| ConfigError::MissingToken {
                course_id: course_id.to_string(),
                path: self.path.clone(),
            })
    }

    /// Insert or replace the token for `course_id`.
    ///
    /// A missing, blank or undecodable file is started afresh. Callers writing
    /// concurrently must serialize calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing file cannot be read, or the new one
    /// cannot be written.
    pub fn store(&self, course_id: &str, token: &str) -> Result<(), SyncError> {
        let mut tokens = match read_json_file::<BTreeMap<String, String>>(&self.path) {
            Ok(tokens) => tokens,
            Err(ConfigError::FileNotFound { .. }) => BTreeMap::new(),
            Err(ConfigError::Parse { source, .. }) => {
                warn!(path = %self.path.display(), "Replacing undecodable token file: {source}");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        tokens.insert(course_id.to_string(), token.to_string());

        let persist_err = |message: String| SyncError::Persist {
            path: self.path.clone(),
            message,
        };
        let json = serde_json::to_vec(&tokens).map_err(|e| persist_err(e.to_string()))?;
        write_atomic(&self.path, &json).map_err(|e| persist_err(e.to_string()))?;

        info!(course_id = %course_id, "Stored forum token");
        Ok(())
    }
}
