pub mod error;
pub mod executor;
pub mod lock;
pub mod step;
pub mod steps;

pub use error::{PipelineError, StepError};
pub use executor::{BuildReport, BuildState, Orchestrator, StepReport, TriggerOptions};
pub use lock::{BuildLock, BuildLockGuard};
pub use step::{Step, StepContext, StepFactory, StepKind, StepOutcome, StepRegistry};
