use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{merge_threads, ForumSource, Thread};
use crate::config::{ApiEndpoints, ConfigError};
use crate::constants::{THREAD_SORT, TOKEN_CHECK_LIMIT, USER_AGENT};
use crate::error::{Service, SyncError};

/// Forum API response for the threads listing.
#[derive(Debug, Deserialize)]
struct ThreadsResponse {
    threads: Vec<Thread>,
}

/// HTTP client for the Ed threads API.
#[derive(Clone)]
pub struct EdClient {
    http: reqwest::Client,
    api_url: String,
    limit: u32,
}

impl EdClient {
    /// Create a client requesting `limit` threads per query.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoints: &ApiEndpoints, limit: u32) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(endpoints.http_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncError::ClientSetup {
                service: Service::Forum,
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_url: endpoints.ed_api_url.clone(),
            limit,
        })
    }

    /// Check whether the forum accepts `token` for `course_id`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the forum cannot be reached.
    pub async fn validate_token(&self, course_id: &str, token: &str) -> Result<bool, SyncError> {
        let response = self
            .request(course_id, token, TOKEN_CHECK_LIMIT, false)?
            .send()
            .await
            .map_err(SyncError::forum_transport)?;

        debug!(course_id = %course_id, status = %response.status(), "Validated forum token");
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    async fn query(
        &self,
        course_id: &str,
        token: &str,
        deleted: bool,
    ) -> Result<Vec<Thread>, SyncError> {
        let response = self
            .request(course_id, token, self.limit, deleted)?
            .send()
            .await
            .map_err(SyncError::forum_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Auth {
                course_id: course_id.to_string(),
                status: status.as_u16(),
            });
        }

        let body: ThreadsResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                SyncError::Malformed {
                    service: Service::Forum,
                    message: e.to_string(),
                }
            } else {
                SyncError::forum_transport(e)
            }
        })?;

        debug!(
            course_id = %course_id,
            deleted,
            count = body.threads.len(),
            "Fetched threads"
        );
        Ok(body.threads)
    }

    fn request(
        &self,
        course_id: &str,
        token: &str,
        limit: u32,
        deleted: bool,
    ) -> Result<reqwest::RequestBuilder, SyncError> {
        let url = self.threads_url(course_id)?;
        let limit = limit.to_string();
        let mut params = vec![("sort", THREAD_SORT), ("limit", limit.as_str())];
        if deleted {
            params.push(("filter", "deleted"));
        }

        Ok(self
            .http
            .get(url)
            .header("x-token", token)
            .query(&params))
    }

    fn threads_url(&self, course_id: &str) -> Result<Url, SyncError> {
        let invalid = |message: String| {
            SyncError::Config(ConfigError::InvalidValue {
                name: "ED_API_URL".to_string(),
                message,
            })
        };

        let mut url = Url::parse(&self.api_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["courses", course_id, "threads"]);
        Ok(url)
    }
}

#[async_trait]
impl ForumSource for EdClient {
    async fn fetch_threads(&self, course_id: &str, token: &str) -> Result<Vec<Thread>, SyncError> {
        let live = self.query(course_id, token, false).await?;
        let deleted = self.query(course_id, token, true).await?;
        Ok(merge_threads(live, deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threads_url_encodes_course() {
        let client = EdClient::new(&ApiEndpoints::for_base_url("http://localhost:1"), 30).unwrap();

        assert_eq!(
            client.threads_url("1234").unwrap().as_str(),
            "http://localhost:1/api/courses/1234/threads"
        );
        assert_eq!(
            client.threads_url("../admin").unwrap().as_str(),
            "http://localhost:1/api/courses/..%2Fadmin/threads"
        );
    }
}
