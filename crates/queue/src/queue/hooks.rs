//! Distributed-lock hooks
//!
//! Runners call these around every item so that cooperating processes
//! sharing one backing store never process the same item at the same time.
//! The defaults (always lock, always intact, no-op unlock) are enough for a
//! single process.

use std::fmt;
use std::sync::Arc;

use crate::locker::KeyLock;

/// Claims an item in the shared store; `false` skips the item
pub type TryLockFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Releases an item in the shared store; called after every claimed item
pub type UnlockFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Checks the item still needs processing once it is locked
pub type IntegrityCheckFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Hook set used by every runner of a queue
///
/// # Example
///
/// ```
/// use scaling_queue::DistributedHooks;
/// use std::collections::HashSet;
/// use std::sync::{Arc, Mutex};
///
/// let claimed = Arc::new(Mutex::new(HashSet::new()));
/// let lock_set = Arc::clone(&claimed);
/// let unlock_set = Arc::clone(&claimed);
///
/// let hooks = DistributedHooks::<u64>::new()
///     .with_try_lock(move |id| lock_set.lock().unwrap().insert(*id))
///     .with_unlock(move |id| {
///         unlock_set.lock().unwrap().remove(id);
///     });
/// # let _ = hooks;
/// ```
pub struct DistributedHooks<E> {
    try_lock: TryLockFn<E>,
    unlock: UnlockFn<E>,
    integrity_check: IntegrityCheckFn<E>,
}

impl<E> Clone for DistributedHooks<E> {
    fn clone(&self) -> Self {
        Self {
            try_lock: Arc::clone(&self.try_lock),
            unlock: Arc::clone(&self.unlock),
            integrity_check: Arc::clone(&self.integrity_check),
        }
    }
}

impl<E> Default for DistributedHooks<E> {
    fn default() -> Self {
        Self {
            try_lock: Arc::new(|_| true),
            unlock: Arc::new(|_| {}),
            integrity_check: Arc::new(|_| true),
        }
    }
}

impl<E> fmt::Debug for DistributedHooks<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedHooks").finish_non_exhaustive()
    }
}

impl<E: 'static> DistributedHooks<E> {
    /// Single-process defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard items with a per-key lock such as [`Locker`](crate::Locker)
    ///
    /// Runners lock and unlock on their own thread, which is what a
    /// thread-owned lock requires.
    pub fn from_key_lock<L>(lock: Arc<L>) -> Self
    where
        L: KeyLock<E> + 'static,
    {
        let unlock = Arc::clone(&lock);
        Self::new()
            .with_try_lock(move |item| lock.try_lock(item))
            .with_unlock(move |item| unlock.unlock(item))
    }

    /// Set the lock hook
    pub fn with_try_lock(mut self, f: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.try_lock = Arc::new(f);
        self
    }

    /// Set the unlock hook
    pub fn with_unlock(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.unlock = Arc::new(f);
        self
    }

    /// Set the integrity-check hook
    pub fn with_integrity_check(mut self, f: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.integrity_check = Arc::new(f);
        self
    }

    pub(crate) fn try_lock(&self, item: &E) -> bool {
        (self.try_lock)(item)
    }

    pub(crate) fn unlock(&self, item: &E) {
        (self.unlock)(item)
    }

    pub(crate) fn integrity_check(&self, item: &E) -> bool {
        (self.integrity_check)(item)
    }
}
