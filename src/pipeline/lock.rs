use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive access to the shared checkout. Waiters are served in arrival
/// order.
#[derive(Debug, Clone, Default)]
pub struct BuildLock {
    inner: Arc<Mutex<()>>,
}

impl BuildLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock. It is held until the returned guard is dropped.
    pub async fn acquire(&self, holder: impl Into<String>) -> BuildLockGuard {
        let holder = holder.into();
        let guard = Arc::clone(&self.inner).lock_owned().await;
        tracing::debug!(%holder, "build lock acquired");
        BuildLockGuard {
            _guard: guard,
            holder,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Proof of holding the [`BuildLock`]. Dropping it releases the lock.
#[derive(Debug)]
pub struct BuildLockGuard {
    _guard: OwnedMutexGuard<()>,
    holder: String,
}

impl BuildLockGuard {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BuildLockGuard {
    fn drop(&mut self) {
        tracing::debug!(holder = %self.holder, "build lock released");
    }
}
