use std::fmt::Write as _;

use axum::Router;
use axum::extract::{Path, State};
use axum::response::Html;
use axum::routing::get;

use crate::error::ApiError;
use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/build", get(list_builds))
        .route("/build/", get(list_builds))
        .route("/build/{sha}", get(build_log))
        .route("/build/{sha}/{step}", get(step_log))
}

/// Most recent builds, newest first.
async fn list_builds(State(state): State<AppState>) -> Html<String> {
    let mut page = String::from("<h1>Most recent builds</h1><ul>");
    for build in state.store.latest_builds() {
        let _ = write!(
            page,
            "<li>[{}] <b>{}</b>: <a href=\"{}\">{}</a> (<a href=\"/build/{}/update\">log</a>)</li>",
            escape_html(&build.date),
            escape_html(&build.author),
            escape_html(&build.url),
            escape_html(&build.title),
            build.sha,
        );
    }
    page.push_str("</ul>");
    Html(page)
}

async fn build_log(
    State(state): State<AppState>,
    Path(sha): Path<String>,
) -> Result<String, ApiError> {
    let record = state
        .store
        .get_build(&sha)
        .await
        .ok_or_else(|| ApiError::NotFound("build".into()))?;
    Ok(record.log)
}

/// One log slot, with links to the other slots of the build.
async fn step_log(
    State(state): State<AppState>,
    Path((sha, step)): Path<(String, String)>,
) -> Result<Html<String>, ApiError> {
    let record = state
        .store
        .get_build(&sha)
        .await
        .ok_or_else(|| ApiError::NotFound("build".into()))?;
    let content = record
        .slot(&step)
        .ok_or_else(|| ApiError::NotFound("build step".into()))?;

    let links: Vec<String> = record
        .slot_names()
        .map(|slot| {
            let slot = escape_html(slot);
            format!("<a href=\"/build/{sha}/{slot}\">{slot}</a>")
        })
        .collect();

    let mut page = String::from("<style>error { color: red; font-weight: bold; }</style>");
    page.push_str(&links.join(" - "));
    page.push_str("<hr><pre>");
    page.push_str(&escape_log(content));
    Ok(Html(page))
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape log output but keep the `<error>` markers steps use to highlight
/// problems.
pub fn escape_log(text: &str) -> String {
    escape_html(text)
        .replace("&lt;error&gt;", "<error>")
        .replace("&lt;/error&gt;", "</error>")
}
