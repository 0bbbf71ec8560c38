use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::Config;
use crate::store::BuildLog;

use super::error::StepError;
use super::steps::{CommandSpec, CommandStep, ValidateJsonStep};

/// Status description used when a step could not produce a verdict.
pub const STEP_ERROR_MESSAGE: &str = "An error occurred while executing this step.";

/// Verdict of a step that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub status: String,
}

impl StepOutcome {
    pub fn success(status: impl Into<String>) -> Self {
        Self {
            success: true,
            status: status.into(),
        }
    }

    pub fn failure(status: impl Into<String>) -> Self {
        Self {
            success: false,
            status: status.into(),
        }
    }
}

/// What a step gets to work with: its own log slot and the checkout.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub log: BuildLog,
    pub checkout: PathBuf,
}

/// One check run against the checkout of a build.
#[async_trait]
pub trait Step: Send + Sync {
    /// Identifier used as the log slot and in the build URLs.
    fn id(&self) -> &str;

    /// Human readable name, used as the commit status context.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError>;
}

pub type StepFactory = Arc<dyn Fn() -> Box<dyn Step> + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Factories for the steps every build runs. Each build gets fresh instances.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: Vec<StepFactory>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.factories.len())
            .finish()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Step> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Registry with the built-in steps enabled in `config`, in order.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for kind in &config.steps {
            registry.factories.push(kind.factory(config));
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn instantiate(&self) -> Vec<Box<dyn Step>> {
        self.factories.iter().map(|factory| factory()).collect()
    }
}

// ---------------------------------------------------------------------------
// Built-in steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    ValidateJson,
    PawnCompile,
    JavaScriptTests,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown step: {0}")]
pub struct UnknownStep(pub String);

impl StepKind {
    pub const fn id(self) -> &'static str {
        match self {
            Self::ValidateJson => "validate-json",
            Self::PawnCompile => "pawn-compile",
            Self::JavaScriptTests => "javascript-tests",
        }
    }

    pub fn factory(self, config: &Config) -> StepFactory {
        match self {
            Self::ValidateJson => Arc::new(|| -> Box<dyn Step> { Box::new(ValidateJsonStep::new()) }),
            Self::PawnCompile => {
                let spec = CommandSpec::pawn_compile(&config.pawn_compiler);
                Arc::new(move || -> Box<dyn Step> { Box::new(CommandStep::new(spec.clone())) })
            }
            Self::JavaScriptTests => {
                let spec =
                    CommandSpec::javascript_tests(&config.test_runner, &config.test_runner_cwd);
                Arc::new(move || -> Box<dyn Step> { Box::new(CommandStep::new(spec.clone())) })
            }
        }
    }
}

impl FromStr for StepKind {
    type Err = UnknownStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validate-json" => Ok(Self::ValidateJson),
            "pawn-compile" => Ok(Self::PawnCompile),
            "javascript-tests" => Ok(Self::JavaScriptTests),
            other => Err(UnknownStep(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Progress of one step within one build.
#[derive(Debug, Clone)]
pub struct StepRun {
    pub id: String,
    pub name: String,
    pub success: bool,
    pub status: String,
    started: Instant,
}

impl StepRun {
    pub fn start(step: &dyn Step) -> Self {
        Self {
            id: step.id().to_owned(),
            name: step.name().to_owned(),
            success: true,
            status: "Unknown".to_owned(),
            started: Instant::now(),
        }
    }

    pub fn finish(&mut self, outcome: StepOutcome) {
        self.success = outcome.success;
        self.status = outcome.status;
    }

    pub fn fail(&mut self, status: impl Into<String>) {
        self.success = false;
        self.status = status.into();
    }

    /// Closing line appended to the step log.
    pub fn summary(&self) -> String {
        format!(
            "\n\nStep finished (took {} seconds); {} {}",
            self.started.elapsed().as_secs_f64(),
            if self.success { "success!" } else { "failure!" },
            self.status
        )
    }
}
