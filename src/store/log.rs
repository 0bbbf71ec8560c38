use std::sync::Arc;

use super::builds::BuildStore;

/// Handle for appending to one log slot of one build.
///
/// Failures to persist are logged and swallowed: losing a log line must not
/// abort the build that produced it.
#[derive(Debug, Clone)]
pub struct BuildLog {
    store: Arc<BuildStore>,
    sha: String,
    slot: String,
}

impl BuildLog {
    pub fn new(store: Arc<BuildStore>, sha: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            store,
            sha: sha.into(),
            slot: slot.into(),
        }
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// A handle on another slot of the same build.
    pub fn for_slot(&self, slot: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.store), self.sha.clone(), slot)
    }

    pub async fn append(&self, text: impl AsRef<str>) {
        if let Err(e) = self
            .store
            .update_log(&self.sha, &self.slot, text.as_ref())
            .await
        {
            tracing::error!(error = %e, sha = %self.sha, slot = %self.slot, "failed to append build log");
        }
    }
}
