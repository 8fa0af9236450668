mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{BackendConfig, SlackOAuthConfig};
use crate::constants::{MAX_THREAD_LIMIT, USER_AGENT};
use crate::forum::EdClient;
use crate::tokens::TokenStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Writes are serialized so concurrent submissions cannot drop each other.
    pub tokens: Arc<Mutex<TokenStore>>,
    pub forum: EdClient,
    pub http: reqwest::Client,
    pub slack_api_url: String,
    pub oauth: Option<Arc<SlackOAuthConfig>>,
}

impl AppState {
    /// Build state from backend configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let forum = EdClient::new(&config.endpoints, MAX_THREAD_LIMIT)
            .context("Failed to build forum client")?;
        let http = reqwest::Client::builder()
            .timeout(config.endpoints.http_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            tokens: Arc::new(Mutex::new(TokenStore::new(&config.token_path))),
            forum,
            http,
            slack_api_url: config.endpoints.slack_api_url.clone(),
            oauth: config.oauth.clone().map(Arc::new),
        })
    }
}

/// Create the application router.
pub fn create_app(state: AppState) -> Router {
    routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the token backend.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn serve(config: BackendConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid backend address")?;

    if config.oauth.is_none() {
        info!("No chat OAuth credentials configured; /tokens/slack/oauth is disabled");
    }

    let app = create_app(AppState::new(&config)?);

    info!(addr = %addr, "Starting token backend");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind token backend")?;

    axum::serve(listener, app).await.context("Token backend error")?;

    Ok(())
}
