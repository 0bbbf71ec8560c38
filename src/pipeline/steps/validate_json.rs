use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::IgnoredAny;

use crate::pipeline::error::StepError;
use crate::pipeline::step::{Step, StepContext, StepOutcome};

/// Checks that every `*.json` file in the checkout parses.
#[derive(Debug, Default)]
pub struct ValidateJsonStep;

impl ValidateJsonStep {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for ValidateJsonStep {
    fn id(&self) -> &str {
        "validate-json"
    }

    fn name(&self) -> &str {
        "Validate JSON files"
    }

    #[tracing::instrument(skip_all, fields(sha = %ctx.log.sha()), err)]
    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        let root = ctx.checkout.clone();
        let results = tokio::task::spawn_blocking(move || check_tree(&root)).await??;

        let mut report = String::new();
        let mut failed = 0_usize;
        for (file, result) in &results {
            match result {
                Ok(()) => {
                    let _ = writeln!(report, "{} contains valid JSON data.", file.display());
                }
                Err(e) => {
                    failed += 1;
                    let _ = writeln!(
                        report,
                        "<error>{} contains invalid JSON data: {e}</error>",
                        file.display()
                    );
                }
            }
        }
        if !report.is_empty() {
            ctx.log.append(report).await;
        }

        let valid = results.len() - failed;
        tracing::info!(valid, failed, "validated JSON files");
        Ok(if failed == 0 {
            StepOutcome::success(format!("Validated {valid} JSON files."))
        } else {
            StepOutcome::failure(format!("Validated {valid} JSON files, failed {failed}."))
        })
    }
}

/// Parse every JSON file below `root`, keyed by path relative to `root`.
/// Hidden files and directories are skipped.
fn check_tree(root: &Path) -> Result<Vec<(PathBuf, Result<(), serde_json::Error>)>, StepError> {
    let mut results = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|source| StepError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() || entry.path().extension().is_none_or(|ext| ext != "json")
        {
            continue;
        }

        let data = std::fs::read(entry.path()).map_err(|source| StepError::Read {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let parsed = serde_json::from_slice::<IgnoredAny>(&data).map(|_| ());
        results.push((relative, parsed));
    }
    Ok(results)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|s| s.starts_with('.'))
}
