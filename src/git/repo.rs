use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::exec::{ExecError, run_logged};
use crate::store::BuildLog;
use crate::validation::{is_safe_ref_name, is_valid_sha};

/// Branch and commit a pull request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseRef {
    pub branch: String,
    pub sha: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("refusing to check out {0:?}")]
    InvalidRef(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("`{command}` failed with {status}")]
    CommandFailed { command: String, status: String },

    #[error("failed to download diff from {url}: {source}")]
    DiffDownload {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("diff download from {url} returned HTTP {status}")]
    DiffStatus { url: String, status: u16 },
}

/// The local checkout builds run against.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
    command_timeout: Duration,
    http: reqwest::Client,
}

impl Repository {
    pub fn new(path: impl Into<PathBuf>, command_timeout: Duration, http: reqwest::Client) -> Self {
        Self {
            path: path.into(),
            command_timeout,
            http,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discard every local change and move the checkout to `base`.
    #[tracing::instrument(skip(self, log), fields(branch = %base.branch, sha = %base.sha), err)]
    pub async fn update_to(&self, log: &BuildLog, base: &BaseRef) -> Result<(), RepositoryError> {
        if !is_safe_ref_name(&base.branch) {
            return Err(RepositoryError::InvalidRef(base.branch.clone()));
        }
        if !is_valid_sha(&base.sha) {
            return Err(RepositoryError::InvalidRef(base.sha.clone()));
        }

        self.git(log, &["fetch", "--all"], None).await?;
        self.git(log, &["reset", "--hard"], None).await?;
        self.git(log, &["clean", "-ffdx"], None).await?;
        self.git(log, &["checkout", &base.branch, "--"], None).await?;
        self.git(log, &["reset", "--hard", &base.sha], None).await?;
        Ok(())
    }

    /// Download the pull request diff and apply it to the working tree.
    /// An empty diff leaves the tree untouched.
    #[tracing::instrument(skip(self, log), err)]
    pub async fn apply_diff(&self, log: &BuildLog, diff_url: &str) -> Result<(), RepositoryError> {
        log.append(format!("Downloading {diff_url}")).await;

        let download_err = |source| RepositoryError::DiffDownload {
            url: diff_url.to_owned(),
            source,
        };
        let resp = self
            .http
            .get(diff_url)
            .header("User-Agent", crate::USER_AGENT)
            .header("Accept", "application/vnd.github.v3.diff")
            .send()
            .await
            .map_err(download_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RepositoryError::DiffStatus {
                url: diff_url.to_owned(),
                status: status.as_u16(),
            });
        }
        let diff = resp.bytes().await.map_err(download_err)?;

        if diff.iter().all(u8::is_ascii_whitespace) {
            log.append("Diff is empty, nothing to apply.").await;
            return Ok(());
        }

        self.git(log, &["apply", "--verbose", "-"], Some(&diff[..])).await
    }

    async fn git(
        &self,
        log: &BuildLog,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<(), RepositoryError> {
        let display = format!("git {}", args.join(" "));
        let mut command = Command::new("git");
        command.arg("-C").arg(&self.path).args(args);

        let status = run_logged(&mut command, &display, stdin, self.command_timeout, log).await?;
        if !status.success() {
            return Err(RepositoryError::CommandFailed {
                command: display,
                status: status.to_string(),
            });
        }
        Ok(())
    }
}
