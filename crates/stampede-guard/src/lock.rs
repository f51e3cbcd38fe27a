//! Scoped acquisition of distributed locks.

use crate::collaborators::{Lock, LockManager};
use crate::error::LockError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Far enough out to mean "never" while staying representable as an
/// [`Instant`] on every platform.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + after`, saturating at [`FAR_FUTURE`] from `start`.
pub(crate) fn deadline_after(start: Instant, after: Duration) -> Instant {
    start + after.min(FAR_FUTURE)
}

/// Takes locks from a [`LockManager`], retrying until a deadline.
#[derive(Clone)]
pub struct LockWrapper {
    manager: Arc<dyn LockManager>,
    retry_interval: Duration,
}

impl LockWrapper {
    pub fn new(manager: Arc<dyn LockManager>, retry_interval: Duration) -> Self {
        Self {
            manager,
            retry_interval: retry_interval.max(Duration::from_millis(1)),
        }
    }

    /// Takes `key` for `ttl`, retrying every retry interval for up to `wait`.
    ///
    /// `wait == Duration::ZERO` makes exactly one attempt. Returns
    /// [`LockError::NotAcquired`] if the lock is still held at the deadline.
    /// Dropping the returned future abandons the attempt.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = deadline_after(Instant::now(), wait);
        loop {
            if let Some(lock) = self.manager.try_lock(key, ttl).await? {
                return Ok(LockGuard { lock: Some(lock) });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::NotAcquired {
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    /// Single non-blocking attempt.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        self.acquire(key, ttl, Duration::ZERO).await
    }
}

impl fmt::Debug for LockWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockWrapper")
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

/// A held lock, released exactly once.
///
/// Prefer [`release`](Self::release) to observe release errors. A guard
/// dropped without an explicit release (panic, cancellation, early return)
/// schedules the release on the current tokio runtime.
pub struct LockGuard {
    lock: Option<Box<dyn Lock>>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        self.lock.as_ref().map(|l| l.key()).unwrap_or_default()
    }

    pub fn owner_token(&self) -> &str {
        self.lock.as_ref().map(|l| l.owner_token()).unwrap_or_default()
    }

    /// Releases the lock now.
    pub async fn release(mut self) -> Result<(), LockError> {
        match self.lock.take() {
            Some(lock) => lock.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(_err) = lock.release().await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(key = lock.key(), error = %_err, "deferred lock release failed");
                    }
                });
            }
            // No runtime to release on; the lock's TTL reclaims it.
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = lock.key(), "lock dropped outside a runtime; left to expire");
            }
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key())
            .field("held", &self.lock.is_some())
            .finish()
    }
}
