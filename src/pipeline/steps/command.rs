use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::exec::run_logged;
use crate::pipeline::error::StepError;
use crate::pipeline::step::{Step, StepContext, StepOutcome};

/// Where a command step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingDir {
    /// Relative to the build checkout.
    Checkout(PathBuf),
    /// A fixed directory outside the checkout.
    Fixed(PathBuf),
}

/// An external program whose exit status decides the step.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub id: String,
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: WorkingDir,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub success_status: String,
    pub failure_status: String,
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl CommandSpec {
    /// Compile the gamemode with the bundled Pawn compiler.
    pub fn pawn_compile(compiler: &Path) -> Self {
        Self {
            id: "pawn-compile".into(),
            name: "Pawn compilation".into(),
            program: PathBuf::from("nice"),
            args: vec![
                "-n".into(),
                "19".into(),
                absolute(compiler).display().to_string(),
                "lvp.pwn".into(),
            ],
            working_dir: WorkingDir::Checkout(PathBuf::from("pawn")),
            env: Vec::new(),
            timeout: Duration::from_secs(180),
            success_status: "Successfully compiled lvp.amx.".into(),
            failure_status: "Found errors while trying to compile lvp.amx.".into(),
        }
    }

    /// Run the JavaScript test runner. Its shared libraries live next to it.
    pub fn javascript_tests(runner: &Path, cwd: &Path) -> Self {
        let runner = absolute(runner);
        let library_dir = runner
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            id: "javascript-tests".into(),
            name: "JavaScript tests".into(),
            program: runner,
            args: Vec::new(),
            working_dir: WorkingDir::Fixed(absolute(cwd)),
            env: vec![("LD_LIBRARY_PATH".into(), library_dir.display().to_string())],
            timeout: Duration::from_secs(30),
            success_status: "Successfully tested the JavaScript code.".into(),
            failure_status: "Found errors while testing the JavaScript code.".into(),
        }
    }

    /// Shell-like rendition for the build log.
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct CommandStep {
    spec: CommandSpec,
}

impl CommandStep {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Step for CommandStep {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    #[tracing::instrument(skip_all, fields(step = %self.spec.id, sha = %ctx.log.sha()), err)]
    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        let cwd = match &self.spec.working_dir {
            WorkingDir::Checkout(relative) => ctx.checkout.join(relative),
            WorkingDir::Fixed(dir) => dir.clone(),
        };

        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&cwd);

        let status = run_logged(
            &mut command,
            &self.spec.display(),
            None,
            self.spec.timeout,
            &ctx.log,
        )
        .await?;

        Ok(if status.success() {
            StepOutcome::success(&self.spec.success_status)
        } else {
            StepOutcome::failure(&self.spec.failure_status)
        })
    }
}
