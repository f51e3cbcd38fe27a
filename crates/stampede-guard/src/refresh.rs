//! Background refresh pool.
//!
//! Refreshes run as detached tasks, so they outlive the request that
//! triggered them. Concurrency is bounded by a semaphore and a key is never
//! refreshed twice at once within a process. A refresh that cannot get a
//! pool slot is skipped rather than queued: the value it would have
//! refreshed is already being served stale, and the next stale read will
//! try again.

use hashbrown::HashSet;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Result of [`Refresher::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The refresh was started.
    Spawned,
    /// A refresh for the key is already running in this process.
    AlreadyPending,
    /// Every pool slot is busy; the refresh was skipped.
    PoolExhausted,
}

/// Bounded pool of detached refresh tasks, deduplicated per key.
#[derive(Debug, Clone)]
pub struct Refresher {
    permits: Arc<Semaphore>,
    pending: Arc<Mutex<HashSet<String>>>,
    capacity: usize,
}

impl Refresher {
    /// Creates a pool running at most `max_concurrent` refreshes at once.
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            pending: Arc::new(Mutex::new(HashSet::new())),
            capacity,
        }
    }

    /// Spawns `job` as the refresh for `key` unless one is already running
    /// or the pool is full.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, key: &str, job: F) -> Submission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if pending.contains(key) {
            return Submission::AlreadyPending;
        }
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Submission::PoolExhausted;
        };
        pending.insert(key.to_string());
        drop(pending);

        let slot = PendingSlot {
            pending: Arc::clone(&self.pending),
            key: key.to_string(),
        };
        tokio::spawn(async move {
            let _slot = slot;
            let _permit = permit;
            job.await;
        });
        Submission::Spawned
    }

    /// Returns true if a refresh for `key` is running.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains(key)
    }

    /// Refreshes currently running.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Clears the key's pending mark when the refresh task ends, whether it
/// finished, panicked or was aborted.
struct PendingSlot {
    pending: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}
