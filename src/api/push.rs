use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use bytes::Bytes;
use serde::Deserialize;

use crate::auth::signature::EVENT_HEADER;
use crate::error::ApiError;
use crate::git::BaseRef;
use crate::pipeline::TriggerOptions;
use crate::store::AppState;
use crate::validation::is_valid_sha;

pub const EVENT_SKIPPED: &str = "Event skipped.";
pub const EVENT_HANDLED: &str = "Event handled.";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: Option<String>,
    pub pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub number: Option<u64>,
    pub title: String,
    pub html_url: String,
    pub statuses_url: String,
    pub diff_url: String,
    pub head: Head,
    pub base: Base,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct Head {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct Base {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub login: String,
}

impl From<PullRequest> for TriggerOptions {
    fn from(pr: PullRequest) -> Self {
        Self {
            sha: pr.head.sha,
            author: pr.user.login,
            title: pr.title,
            url: pr.html_url,
            status_url: pr.statuses_url,
            diff_url: pr.diff_url,
            base: BaseRef {
                branch: pr.base.ref_name,
                sha: pr.base.sha,
            },
        }
    }
}

/// Whether a pull request action changes the code under review.
pub fn triggers_build(action: Option<&str>) -> bool {
    matches!(
        action,
        None | Some("opened" | "reopened" | "synchronize" | "edited")
    )
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new().route("/push", post(push))
}

/// Webhook receiver. Answers before the build runs; the build itself is
/// spawned in the background.
#[tracing::instrument(
    skip_all,
    fields(
        event = tracing::field::Empty,
        pr = tracing::field::Empty,
        sha = tracing::field::Empty
    )
)]
async fn push(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    if let Err(e) = state.authenticator.verify(&headers, &body) {
        tracing::warn!(error = %e, "rejected webhook delivery");
        return Err(ApiError::Unauthorized);
    }

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tracing::Span::current().record("event", event);
    if event != "pull_request" {
        tracing::info!("skipping event");
        return Ok(EVENT_SKIPPED);
    }

    let payload: PullRequestEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "malformed pull request event");
        ApiError::BadRequest(format!("malformed pull request event: {e}"))
    })?;

    let span = tracing::Span::current();
    if let Some(number) = payload.pull_request.number {
        span.record("pr", number);
    }
    span.record("sha", payload.pull_request.head.sha.as_str());

    if !triggers_build(payload.action.as_deref()) {
        tracing::info!(action = ?payload.action, "skipping pull request action");
        return Ok(EVENT_SKIPPED);
    }

    if !is_valid_sha(&payload.pull_request.head.sha) {
        return Err(ApiError::BadRequest("invalid head sha".into()));
    }

    let options = TriggerOptions::from(payload.pull_request);
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        let sha = options.sha.clone();
        match orchestrator.trigger(options).await {
            Ok(report) => tracing::info!(%sha, state = ?report.state, "build finished"),
            Err(e) => tracing::error!(error = %e, %sha, "build aborted"),
        }
    });

    tracing::info!("build triggered");
    Ok(EVENT_HANDLED)
}
