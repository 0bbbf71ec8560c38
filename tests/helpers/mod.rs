#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

use ci_server::auth::Authenticator;
use ci_server::git::{BaseRef, Repository};
use ci_server::notify::StatusReporter;
use ci_server::pipeline::{
    Orchestrator, Step, StepContext, StepError, StepOutcome, StepRegistry, TriggerOptions,
};
use ci_server::store::{AppState, BuildStore};

pub const SECRET: &str = "test webhook secret";

/// A patch adding `added.txt`, as served for the pull request diff.
pub const PATCH: &str = "diff --git a/added.txt b/added.txt\n\
new file mode 100644\n\
--- /dev/null\n\
+++ b/added.txt\n\
@@ -0,0 +1 @@\n\
+hello from the pull request\n";

pub fn sha(n: u32) -> String {
    format!("{n:0>40}")
}

// ---------------------------------------------------------------------------
// Git fixtures
// ---------------------------------------------------------------------------

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=ci", "-c", "user.email=ci@localhost"])
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_owned()
}

/// Storage and a checkout cloned from a one-commit upstream on `main`.
pub struct TestEnv {
    pub storage: TempDir,
    pub root: TempDir,
    pub checkout: PathBuf,
    pub base: BaseRef,
    pub store: Arc<BuildStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        let storage = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();

        let upstream = root.path().join("upstream");
        std::fs::create_dir_all(upstream.join("data")).unwrap();
        git(&upstream, &["init", "-q"]);
        git(&upstream, &["checkout", "-q", "-b", "main"]);
        std::fs::write(upstream.join("data/config.json"), r#"{"ok": true}"#).unwrap();
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "-q", "-m", "initial"]);
        let base_sha = git(&upstream, &["rev-parse", "HEAD"]);

        let checkout = root.path().join("checkout");
        git(
            root.path(),
            &[
                "clone",
                "-q",
                upstream.to_str().unwrap(),
                checkout.to_str().unwrap(),
            ],
        );

        let store = Arc::new(BuildStore::new(storage.path()));
        Self {
            storage,
            root,
            checkout,
            base: BaseRef {
                branch: "main".into(),
                sha: base_sha,
            },
            store,
        }
    }

    pub fn orchestrator(&self, steps: StepRegistry) -> Orchestrator {
        let client = reqwest::Client::new();
        Orchestrator::new(
            Arc::clone(&self.store),
            Repository::new(&self.checkout, Duration::from_secs(30), client.clone()),
            StatusReporter::new(client, "status-token"),
            steps,
            "http://ci.test",
        )
    }

    pub fn state(&self, steps: StepRegistry) -> AppState {
        AppState {
            store: Arc::clone(&self.store),
            orchestrator: Arc::new(self.orchestrator(steps)),
            authenticator: Arc::new(Authenticator::new(SECRET)),
        }
    }

    pub fn options(&self, sha: &str, server: &MockServer) -> TriggerOptions {
        TriggerOptions {
            sha: sha.to_owned(),
            author: "alice".into(),
            title: "Add a file".into(),
            url: "https://github.com/owner/repo/pull/1".into(),
            status_url: format!("{}/statuses/{sha}", server.uri()),
            diff_url: format!("{}/pull/1.diff", server.uri()),
            base: self.base.clone(),
        }
    }
}

/// A `pull_request` webhook body for `sha` against `base`.
pub fn pr_event(action: &str, sha: &str, base: &BaseRef, server: &MockServer) -> Value {
    serde_json::json!({
        "action": action,
        "number": 1,
        "pull_request": {
            "number": 1,
            "title": "Add a file",
            "html_url": "https://github.com/owner/repo/pull/1",
            "statuses_url": format!("{}/statuses/{sha}", server.uri()),
            "diff_url": format!("{}/pull/1.diff", server.uri()),
            "head": { "sha": sha },
            "base": { "ref": base.branch, "sha": base.sha },
            "user": { "login": "alice" }
        }
    })
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub fn test_router(state: AppState) -> Router {
    ci_server::api::app(state, 1024 * 1024)
}

pub fn signature(body: &[u8]) -> String {
    Authenticator::new(SECRET).sign(body)
}

/// POST `/push` with the given optional headers.
pub async fn push_raw(
    app: &Router,
    event: Option<&str>,
    signature: Option<&str>,
    body: Vec<u8>,
) -> (StatusCode, String) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/push")
        .header("content-type", "application/json");
    if let Some(event) = event {
        builder = builder.header("x-github-event", event);
    }
    if let Some(signature) = signature {
        builder = builder.header("x-hub-signature", signature);
    }
    let req = builder.body(Body::from(body)).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_text(resp).await)
}

/// POST `/push` with a correctly signed body.
pub async fn signed_push(app: &Router, event: &str, body: &Value) -> (StatusCode, String) {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = signature(&bytes);
    push_raw(app, Some(event), Some(&signature), bytes).await
}

pub async fn get_text(app: &Router, path: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_text(resp).await)
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Poll `check` until it holds, failing the test after ten seconds.
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Bodies of every status POST the mock server received, in arrival order.
pub async fn posted_statuses(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Test steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed(&'static str),
    Fail(&'static str),
    Error(&'static str),
    Panic,
}

/// A step with a fixed verdict.
pub struct StaticStep {
    pub id: &'static str,
    pub name: &'static str,
    pub behavior: Behavior,
}

#[async_trait]
impl Step for StaticStep {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        ctx.log.append(format!("running {}", self.id)).await;
        match self.behavior {
            Behavior::Succeed(status) => Ok(StepOutcome::success(status)),
            Behavior::Fail(status) => Ok(StepOutcome::failure(status)),
            Behavior::Error(message) => Err(StepError::Other(message.into())),
            Behavior::Panic => panic!("step exploded"),
        }
    }
}

pub fn registry(steps: Vec<(&'static str, &'static str, Behavior)>) -> StepRegistry {
    let mut registry = StepRegistry::new();
    for (id, name, behavior) in steps {
        registry.register(move || {
            Box::new(StaticStep {
                id,
                name,
                behavior,
            })
        });
    }
    registry
}

/// Records when it starts and finishes, per build.
pub struct RecordingStep {
    pub events: Arc<Mutex<Vec<String>>>,
    pub delay: Duration,
}

#[async_trait]
impl Step for RecordingStep {
    fn id(&self) -> &str {
        "recording"
    }

    fn name(&self) -> &str {
        "Recording"
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {}", ctx.log.sha()));
        tokio::time::sleep(self.delay).await;
        self.events
            .lock()
            .unwrap()
            .push(format!("end {}", ctx.log.sha()));
        Ok(StepOutcome::success("recorded"))
    }
}
