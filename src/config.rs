use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{MAX_THREAD_LIMIT, WEBHOOK_DESTINATION};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid snapshot {}: {message}", path.display())]
    InvalidSnapshot { path: PathBuf, message: String },
    #[error("auth token for course {course_id} not found in {}", path.display())]
    MissingToken { course_id: String, path: PathBuf },
}

/// API base URLs and HTTP settings shared by the poller and the token backend.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    /// Forum REST API root, e.g. `https://us.edstem.org/api`.
    pub ed_api_url: String,
    /// Forum web UI root used for thread links.
    pub ed_web_url: String,
    /// Chat Web API root.
    pub slack_api_url: String,
    pub http_timeout: Duration,
}

impl ApiEndpoints {
    /// Load endpoint overrides from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `HTTP_TIMEOUT_SECS` is not an integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            ed_api_url: trim_url(&env_or_default("ED_API_URL", "https://us.edstem.org/api")),
            ed_web_url: trim_url(&env_or_default("ED_WEB_URL", "https://edstem.org/us")),
            slack_api_url: trim_url(&env_or_default("SLACK_API_URL", "https://slack.com/api")),
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
        })
    }

    /// Endpoints pointing every service at the same base URL.
    #[must_use]
    pub fn for_base_url(base: &str) -> Self {
        let base = trim_url(base);
        Self {
            ed_api_url: format!("{base}/api"),
            ed_web_url: format!("{base}/web"),
            slack_api_url: format!("{base}/slack"),
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// How notifications reach the chat workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMode {
    /// Bot token posting to each channel; supports reactions.
    Bot {
        auth_token: String,
        channel_ids: Vec<String>,
    },
    /// Incoming webhook; fire-and-forget, no reactions.
    Webhook { url: String },
}

/// Contents of the notifier JSON config file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    ed_course_id: String,
    #[serde(default)]
    slack_auth_token: Option<String>,
    #[serde(default)]
    channel_ids: Vec<String>,
    #[serde(default)]
    slack_webhook_url: Option<String>,
}

/// Configuration for one notifier pass.
#[derive(Debug, Clone)]
pub struct Config {
    pub course_id: String,
    pub chat: ChatMode,
    pub token_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub thread_limit: u32,
    pub poll_interval: Duration,
    pub endpoints: ApiEndpoints,
}

impl Config {
    /// Load configuration from the JSON config file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed, or an environment
    /// override cannot be parsed.
    pub fn load(
        config_path: &Path,
        token_path: &Path,
        snapshot_path: &Path,
    ) -> Result<Self, ConfigError> {
        let file: ConfigFile = read_json_file(config_path)?;
        let chat = match (file.slack_webhook_url, file.slack_auth_token) {
            (Some(url), _) if !url.is_empty() => ChatMode::Webhook { url },
            (_, Some(auth_token)) => ChatMode::Bot {
                auth_token,
                channel_ids: file.channel_ids,
            },
            (_, None) => {
                return Err(ConfigError::InvalidValue {
                    name: "slack_auth_token".to_string(),
                    message: "either slack_auth_token or slack_webhook_url is required"
                        .to_string(),
                })
            }
        };

        Ok(Self {
            course_id: file.ed_course_id,
            chat,
            token_path: token_path.to_path_buf(),
            snapshot_path: snapshot_path.to_path_buf(),
            thread_limit: parse_env_u32("THREAD_LIMIT", 30)?,
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 60)?),
            endpoints: ApiEndpoints::from_env()?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.course_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ed_course_id".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.thread_limit == 0 || self.thread_limit > MAX_THREAD_LIMIT {
            return Err(ConfigError::InvalidValue {
                name: "THREAD_LIMIT".to_string(),
                message: format!("must be between 1 and {MAX_THREAD_LIMIT}"),
            });
        }
        match &self.chat {
            ChatMode::Bot {
                auth_token,
                channel_ids,
            } => {
                if auth_token.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        name: "slack_auth_token".to_string(),
                        message: "cannot be empty".to_string(),
                    });
                }
                if channel_ids.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        name: "channel_ids".to_string(),
                        message: "at least one channel is required".to_string(),
                    });
                }
            }
            ChatMode::Webhook { url } => {
                url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                    name: "slack_webhook_url".to_string(),
                    message: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Chat destinations every new thread is posted to.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        match &self.chat {
            ChatMode::Bot { channel_ids, .. } => channel_ids.clone(),
            ChatMode::Webhook { .. } => vec![WEBHOOK_DESTINATION.to_string()],
        }
    }
}

/// Chat app OAuth client credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackOAuthConfig {
    #[serde(rename = "slack_client_id")]
    pub client_id: String,
    #[serde(rename = "slack_client_secret")]
    pub client_secret: String,
    #[serde(skip)]
    pub redirect_uri: String,
}

/// Configuration for the token-issuance backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub token_path: PathBuf,
    pub oauth: Option<SlackOAuthConfig>,
    pub endpoints: ApiEndpoints,
}

impl BackendConfig {
    /// Build backend configuration, reading OAuth credentials if a path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the OAuth credentials file is missing or malformed.
    pub fn load(
        host: &str,
        port: u16,
        token_path: &Path,
        slack_auth_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let oauth = slack_auth_path
            .map(|path| {
                read_json_file::<SlackOAuthConfig>(path).map(|mut oauth| {
                    oauth.redirect_uri = env_or_default("SLACK_OAUTH_REDIRECT_URI", "");
                    oauth
                })
            })
            .transpose()?;

        Ok(Self {
            host: host.to_string(),
            port,
            token_path: token_path.to_path_buf(),
            oauth,
            endpoints: ApiEndpoints::from_env()?,
        })
    }
}

/// Read and deserialize a JSON file, mapping failures to [`ConfigError`].
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, ConfigError> {
    let raw = read_file(path)?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn load(json: &str) -> Result<Config, ConfigError> {
        let file = write_config(json);
        Config::load(file.path(), Path::new("tokens.json"), Path::new("cache.json"))
    }

    #[test]
    #[serial]
    fn test_load_bot_mode() {
        let config = load(
            r#"{"ed_course_id": "1234", "slack_auth_token": "xoxb-1", "channel_ids": ["C1", "C2"]}"#,
        )
        .unwrap();

        assert_eq!(config.course_id, "1234");
        assert_eq!(config.destinations(), vec!["C1", "C2"]);
        assert_eq!(config.thread_limit, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_webhook_mode_takes_precedence() {
        let config = load(
            r#"{"ed_course_id": "1", "slack_auth_token": "xoxb-1", "slack_webhook_url": "https://hooks.example.com/T/B/X"}"#,
        )
        .unwrap();

        assert!(matches!(config.chat, ChatMode::Webhook { .. }));
        assert_eq!(config.destinations(), vec![WEBHOOK_DESTINATION]);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_chat_credentials() {
        let err = load(r#"{"ed_course_id": "1"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    #[serial]
    fn test_missing_course_id_is_parse_error() {
        let err = load(r#"{"slack_auth_token": "xoxb-1"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(
            Path::new("/nonexistent/config.json"),
            Path::new("tokens.json"),
            Path::new("cache.json"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_validate_rejects_empty_channels() {
        let config = load(r#"{"ed_course_id": "1", "slack_auth_token": "xoxb-1"}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_thread_limit_bounds() {
        std::env::set_var("THREAD_LIMIT", "101");
        let config = load(
            r#"{"ed_course_id": "1", "slack_auth_token": "xoxb-1", "channel_ids": ["C1"]}"#,
        );
        std::env::remove_var("THREAD_LIMIT");

        let config = config.unwrap();
        assert_eq!(config.thread_limit, 101);
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_endpoint_overrides_strip_trailing_slash() {
        std::env::set_var("ED_API_URL", "http://localhost:9000/api/");
        let endpoints = ApiEndpoints::from_env();
        std::env::remove_var("ED_API_URL");

        assert_eq!(endpoints.unwrap().ed_api_url, "http://localhost:9000/api");
    }
}
