use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer};
use serde_json::json;

use super::AppState;
use crate::chat::exchange_oauth_code;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tokens/ed/submit", post(submit_token))
        .route("/tokens/slack/oauth", get(slack_oauth))
        .route("/healthz", get(health))
}

#[derive(Debug, Deserialize)]
pub struct TokenSubmission {
    #[serde(deserialize_with = "string_or_number")]
    course_id: String,
    #[serde(rename = "x-token")]
    token: String,
}

async fn submit_token(
    State(state): State<AppState>,
    Json(submission): Json<TokenSubmission>,
) -> Response {
    let valid = match state
        .forum
        .validate_token(&submission.course_id, &submission.token)
        .await
    {
        Ok(valid) => valid,
        Err(e) => {
            tracing::error!(course_id = %submission.course_id, "Failed to validate token: {e}");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    if !valid {
        tracing::info!(course_id = %submission.course_id, "Rejected invalid forum token");
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let tokens = state.tokens.lock().await;
    match tokens.store(&submission.course_id, &submission.token) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!("Failed to store token: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OAuthParams {
    code: Option<String>,
}

async fn slack_oauth(State(state): State<AppState>, Query(params): Query<OAuthParams>) -> Response {
    let Some(oauth) = state.oauth.as_deref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "OAuth is not configured").into_response();
    };
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing code").into_response();
    };

    match exchange_oauth_code(&state.http, &state.slack_api_url, oauth, &code).await {
        Ok(exchange) => (exchange.status, Json(json!({ "ok": exchange.ok }))).into_response(),
        Err(e) => {
            tracing::error!("OAuth exchange failed: {e}");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Accept a course id sent either as a JSON string or number.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
