use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::step::StepKind;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub webhook_secret: String,
    pub storage_path: PathBuf,
    pub checkout_path: PathBuf,
    pub endpoint: String,
    pub status_token: String,
    pub command_timeout: Duration,
    pub steps: Vec<StepKind>,
    pub pawn_compiler: PathBuf,
    pub test_runner: PathBuf,
    pub test_runner_cwd: PathBuf,
    pub max_body_bytes: usize,
}

fn parse_steps(s: &str) -> Vec<StepKind> {
    s.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| match name.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unknown build step");
                None
            }
        })
        .collect()
}

impl Config {
    pub fn load() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. `load` reads the
    /// process environment; tests pass a map.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            listen: var("CI_LISTEN").unwrap_or_else(|| "0.0.0.0:8080".into()),
            webhook_secret: var("CI_WEBHOOK_SECRET").unwrap_or_default(),
            storage_path: var("CI_STORAGE_PATH")
                .map_or_else(|| PathBuf::from("builds"), PathBuf::from),
            checkout_path: var("CI_CHECKOUT_PATH")
                .map_or_else(|| PathBuf::from("../playground"), PathBuf::from),
            endpoint: var("CI_ENDPOINT").unwrap_or_else(|| "http://localhost:8080".into()),
            status_token: var("CI_STATUS_TOKEN").unwrap_or_default(),
            command_timeout: Duration::from_secs(
                var("CI_COMMAND_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            steps: var("CI_STEPS").map_or_else(
                || {
                    vec![
                        StepKind::ValidateJson,
                        StepKind::PawnCompile,
                        StepKind::JavaScriptTests,
                    ]
                },
                |v| parse_steps(&v),
            ),
            pawn_compiler: var("CI_PAWN_COMPILER")
                .map_or_else(|| PathBuf::from("tools/lvpcc/pawncc"), PathBuf::from),
            test_runner: var("CI_TEST_RUNNER").map_or_else(
                || PathBuf::from("../playgroundjs-plugin/src/out/test_runner"),
                PathBuf::from,
            ),
            test_runner_cwd: var("CI_TEST_RUNNER_CWD")
                .map_or_else(|| PathBuf::from("../server"), PathBuf::from),
            max_body_bytes: var("CI_MAX_BODY_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5 * 1024 * 1024),
        }
    }
}
