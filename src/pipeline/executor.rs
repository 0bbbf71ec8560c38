use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::join_all;

use crate::config::Config;
use crate::git::{BaseRef, Repository, RepositoryError};
use crate::notify::{StatusPayload, StatusReporter, StatusState};
use crate::store::{BuildLog, BuildMeta, BuildStore};

use super::error::PipelineError;
use super::lock::BuildLock;
use super::step::{STEP_ERROR_MESSAGE, Step, StepContext, StepRegistry, StepRun};

/// Log slot of the repository update phase.
pub const UPDATE_SLOT: &str = "update";

/// Status context used when the repository update fails.
pub const UPDATE_CONTEXT: &str = "Repository update";

/// Everything needed to build one pull request head.
#[derive(Debug, Clone)]
pub struct TriggerOptions {
    pub sha: String,
    pub author: String,
    pub title: String,
    pub url: String,
    pub status_url: String,
    pub diff_url: String,
    pub base: BaseRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Created,
    RepositoryUpdating,
    StepsRunning,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub id: String,
    pub name: String,
    pub state: StatusState,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub sha: String,
    pub state: BuildState,
    pub steps: Vec<StepReport>,
}

/// Runs builds: one at a time against the shared checkout, with the steps
/// of a build fanned out concurrently.
#[derive(Debug)]
pub struct Orchestrator {
    store: Arc<BuildStore>,
    lock: BuildLock,
    repository: Repository,
    reporter: StatusReporter,
    steps: StepRegistry,
    endpoint: String,
}

impl Orchestrator {
    pub fn new(
        store: Arc<BuildStore>,
        repository: Repository,
        reporter: StatusReporter,
        steps: StepRegistry,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            store,
            lock: BuildLock::new(),
            repository,
            reporter,
            steps,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
        }
    }

    pub fn from_config(config: &Config, store: Arc<BuildStore>, http: reqwest::Client) -> Self {
        Self::new(
            store,
            Repository::new(&config.checkout_path, config.command_timeout, http.clone()),
            StatusReporter::new(http, config.status_token.clone()),
            StepRegistry::from_config(config),
            config.endpoint.clone(),
        )
    }

    pub fn lock(&self) -> &BuildLock {
        &self.lock
    }

    pub fn store(&self) -> &Arc<BuildStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Build lifecycle
    // -----------------------------------------------------------------------

    /// Run a complete build. Only a failure to create the build record is
    /// returned as an error; a failed repository update ends the build in
    /// [`BuildState::Failed`].
    #[tracing::instrument(skip(self, options), fields(sha = %options.sha), err)]
    pub async fn trigger(&self, options: TriggerOptions) -> Result<BuildReport, PipelineError> {
        let meta = BuildMeta {
            author: options.author.clone(),
            title: options.title.clone(),
            url: options.url.clone(),
        };
        self.store.create_build(&options.sha, meta).await?;
        let mut state = BuildState::Created;
        tracing::info!(?state, "build created, waiting for the build lock");

        let _lock = self.lock.acquire(options.sha.clone()).await;

        state = BuildState::RepositoryUpdating;
        tracing::info!(?state, "build lock acquired");
        let update_log = BuildLog::new(Arc::clone(&self.store), options.sha.clone(), UPDATE_SLOT);
        if let Err(e) = self.update_repository(&update_log, &options).await {
            state = BuildState::Failed;
            tracing::error!(error = %e, ?state, "repository update failed");
            update_log.append(format!("Error: {e}")).await;

            let payload = StatusPayload::new(
                StatusState::Failure,
                self.target_url(&options.sha, UPDATE_SLOT),
                &format!("Unable to update the repository: {e}"),
                UPDATE_CONTEXT,
            );
            self.report(&options.status_url, &payload).await;

            return Ok(BuildReport {
                sha: options.sha,
                state,
                steps: Vec::new(),
            });
        }

        state = BuildState::StepsRunning;
        let steps = self.steps.instantiate();
        tracing::info!(?state, steps = steps.len(), "running build steps");
        let reports = join_all(steps.iter().map(|step| self.run_step(step.as_ref(), &options))).await;

        state = BuildState::Completed;
        tracing::info!(
            ?state,
            failed = reports.iter().filter(|r| r.state != StatusState::Success).count(),
            "build finished"
        );
        Ok(BuildReport {
            sha: options.sha,
            state,
            steps: reports,
        })
    }

    async fn update_repository(
        &self,
        log: &BuildLog,
        options: &TriggerOptions,
    ) -> Result<(), RepositoryError> {
        log.append("Update starting.").await;
        self.repository.update_to(log, &options.base).await?;
        self.repository.apply_diff(log, &options.diff_url).await?;
        log.append("Update completed.").await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Run one step to its verdict. Errors and panics of the step are
    /// contained here so siblings always report.
    #[tracing::instrument(skip(self, step, options), fields(sha = %options.sha, step = %step.id()))]
    async fn run_step(&self, step: &dyn Step, options: &TriggerOptions) -> StepReport {
        let mut run = StepRun::start(step);
        let ctx = StepContext {
            log: BuildLog::new(Arc::clone(&self.store), options.sha.clone(), step.id()),
            checkout: self.repository.path().to_path_buf(),
        };

        ctx.log.append("Step starting.").await;
        self.post_step_status(options, &run, StatusState::Pending, "Pending.")
            .await;

        let result = AssertUnwindSafe(step.run(&ctx)).catch_unwind().await;
        let state = match result {
            Ok(Ok(outcome)) => {
                run.finish(outcome);
                if run.success {
                    StatusState::Success
                } else {
                    StatusState::Failure
                }
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "build step failed");
                ctx.log.append(format!("Error: {e}")).await;
                run.fail(STEP_ERROR_MESSAGE);
                StatusState::Error
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "build step panicked");
                ctx.log.append(format!("Error: step panicked: {message}")).await;
                run.fail(STEP_ERROR_MESSAGE);
                StatusState::Error
            }
        };

        self.post_step_status(options, &run, state, &run.status).await;
        ctx.log.append(run.summary()).await;

        StepReport {
            id: run.id,
            name: run.name,
            state,
            status: run.status,
        }
    }

    async fn post_step_status(
        &self,
        options: &TriggerOptions,
        run: &StepRun,
        state: StatusState,
        description: &str,
    ) {
        let payload = StatusPayload::new(
            state,
            self.target_url(&options.sha, &run.id),
            description,
            run.name.clone(),
        );
        self.report(&options.status_url, &payload).await;
    }

    async fn report(&self, status_url: &str, payload: &StatusPayload) {
        if let Err(e) = self.reporter.post(status_url, payload).await {
            tracing::warn!(
                error = %e,
                state = %payload.state,
                context = %payload.context,
                "failed to post commit status"
            );
        }
    }

    fn target_url(&self, sha: &str, slot: &str) -> String {
        format!("{}/build/{sha}/{slot}", self.endpoint)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
