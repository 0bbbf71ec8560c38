pub mod builds;
pub mod log;

use std::sync::Arc;

pub use builds::{BuildMeta, BuildRecord, BuildStore, BuildSummary, StoreError, RECENT_BUILDS};
pub use log::BuildLog;

use crate::auth::Authenticator;
use crate::pipeline::executor::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<BuildStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub authenticator: Arc<Authenticator>,
}
