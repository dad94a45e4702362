//! Reentrant per-key locking
//!
//! [`Locker`] grants a key to one thread at a time. Threads asking for a key
//! that is already held are queued per key and served strictly in arrival
//! order. The holder may acquire the key again without blocking; it has to
//! release it as many times as it acquired it before the next waiter is
//! promoted.
//!
//! # Example
//!
//! ```
//! use scaling_queue::Locker;
//!
//! let locker = Locker::new();
//!
//! locker.lock(&"invoice-42");
//! locker.lock(&"invoice-42"); // reentrant
//! assert!(locker.is_held_by_current_thread(&"invoice-42"));
//!
//! locker.unlock(&"invoice-42");
//! locker.unlock(&"invoice-42");
//! assert!(!locker.is_held_by_current_thread(&"invoice-42"));
//!
//! let total = locker.execute_with_lock(&"invoice-42", || 40 + 2);
//! assert_eq!(total, 42);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

/// Longest single condvar wait; waiters re-check the queue head after each slice
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Locker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The key was not granted within the requested wait time
    #[error("timed out after {waited:?} waiting for a locked key")]
    Timeout {
        /// How long the caller actually waited
        waited: Duration,
    },
}

/// Minimal per-key lock contract
///
/// This is the seam through which a [`Locker`] (or any other per-key lock,
/// such as one backed by a shared store) can guard item processing in a
/// [`ScalingWorkerQueue`](crate::ScalingWorkerQueue).
pub trait KeyLock<K>: Send + Sync {
    /// Acquire `key` if it is free or already held by the caller
    fn try_lock(&self, key: &K) -> bool;

    /// Block until `key` is granted
    fn lock(&self, key: &K);

    /// Release one acquisition of `key`; a no-op for non-holders
    fn unlock(&self, key: &K);

    /// Whether `key` is held by someone other than the caller
    fn is_locked(&self, key: &K) -> bool;
}

/// Wait queue of a single key
#[derive(Default)]
struct KeyQueue {
    state: Mutex<KeyState>,
    released: Condvar,
}

#[derive(Default)]
struct KeyState {
    /// The head holds the key, everyone behind it waits in arrival order
    waiters: VecDeque<ThreadId>,
    /// Un-matched acquisitions by the head
    holds: usize,
}

/// Reentrant, FIFO-fair mutual exclusion per key
///
/// Keys only need value equality: two equal keys created at different call
/// sites share one wait queue. A key has an entry only while it is held or
/// waited for.
pub struct Locker<K> {
    queues: DashMap<K, Arc<KeyQueue>>,
}

impl<K> Default for Locker<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for Locker<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("locked_keys", &self.queues.len())
            .finish()
    }
}

impl<K> Locker<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create an empty locker
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Acquire `key` without blocking
    ///
    /// Succeeds if the key is free or already held by the current thread
    /// (the hold count is increased). Returns `false` immediately if another
    /// thread holds it.
    pub fn try_lock(&self, key: &K) -> bool {
        let me = thread::current().id();
        let entry = self.queues.entry(key.clone()).or_default();
        let mut state = entry.value().state.lock();

        match state.waiters.front().copied() {
            None => {
                state.waiters.push_back(me);
                state.holds = 1;
                trace!(?key, "Key locked");
                true
            }
            Some(holder) if holder == me => {
                state.holds += 1;
                debug!(?key, holds = state.holds, "Key re-locked by holder");
                true
            }
            Some(holder) => {
                info!(?key, ?holder, "Key is already locked");
                false
            }
        }
    }

    /// Acquire `key` without blocking, or fail with the supplied error
    pub fn try_lock_or_else<X>(&self, key: &K, err: impl FnOnce() -> X) -> Result<(), X> {
        if self.try_lock(key) {
            Ok(())
        } else {
            trace!(?key, "Try lock failed");
            Err(err())
        }
    }

    /// Block until `key` is granted to the current thread
    pub fn lock(&self, key: &K) {
        // Without a deadline the wait only ends once the key is granted
        let _ = self.acquire(key, None);
    }

    /// Block until `key` is granted, giving up after `max_wait`
    ///
    /// On timeout the caller leaves the wait queue and the key stays with its
    /// current holder.
    pub fn lock_timeout(&self, key: &K, max_wait: Duration) -> Result<(), LockError> {
        self.acquire(key, Some(max_wait))
    }

    fn acquire(&self, key: &K, max_wait: Option<Duration>) -> Result<(), LockError> {
        let me = thread::current().id();
        let queue = {
            let entry = self.queues.entry(key.clone()).or_default();
            let queue = Arc::clone(entry.value());
            let mut state = queue.state.lock();
            match state.waiters.front().copied() {
                None => {
                    state.waiters.push_back(me);
                    state.holds = 1;
                    trace!(?key, "Key locked");
                    return Ok(());
                }
                Some(holder) if holder == me => {
                    state.holds += 1;
                    debug!(?key, holds = state.holds, "Key re-locked by holder");
                    return Ok(());
                }
                Some(holder) => {
                    state.waiters.push_back(me);
                    info!(
                        ?key,
                        ?holder,
                        position = state.waiters.len() - 1,
                        "Waiting for locked key"
                    );
                }
            }
            drop(state);
            queue
        };

        let started = Instant::now();
        let deadline = max_wait.map(|wait| started + wait);
        let mut state = queue.state.lock();
        loop {
            if state.waiters.front() == Some(&me) {
                trace!(?key, waited = ?started.elapsed(), "Key granted after waiting");
                return Ok(());
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(WAIT_SLICE)
                }
                None => WAIT_SLICE,
            };
            queue.released.wait_for(&mut state, slice);
        }

        // A queue with a foreign head is never empty, so the entry outlives us
        state.waiters.retain(|waiter| *waiter != me);
        let waited = started.elapsed();
        info!(?key, ?waited, holder = ?state.waiters.front(), "Timed out waiting for locked key");
        Err(LockError::Timeout { waited })
    }

    /// Release one acquisition of `key`
    ///
    /// When the hold count reaches zero the next waiter (if any) becomes the
    /// holder. Calling this without holding the key only logs a warning, so
    /// it is safe to call unconditionally in cleanup paths.
    pub fn unlock(&self, key: &K) {
        let me = thread::current().id();
        let Entry::Occupied(occupied) = self.queues.entry(key.clone()) else {
            warn!(?key, "Unlock ignored, key is not locked");
            return;
        };
        let queue = Arc::clone(occupied.get());

        let emptied = {
            let mut state = queue.state.lock();
            match state.waiters.front().copied() {
                Some(holder) if holder == me => {}
                holder => {
                    warn!(?key, ?holder, "Unlock ignored, key is not held by current thread");
                    return;
                }
            }

            if state.holds > 1 {
                state.holds -= 1;
                debug!(?key, holds = state.holds, "Key still held, hold count decreased");
                return;
            }

            state.waiters.pop_front();
            state.holds = usize::from(!state.waiters.is_empty());
            trace!(?key, next = ?state.waiters.front(), "Key unlocked");
            state.waiters.is_empty()
        };

        if emptied {
            occupied.remove();
        } else {
            drop(occupied);
            queue.released.notify_all();
        }
    }

    /// Whether `key` is held by a thread other than the current one
    pub fn is_locked(&self, key: &K) -> bool {
        self.holder(key)
            .is_some_and(|holder| holder != thread::current().id())
    }

    /// Whether the current thread holds `key`
    pub fn is_held_by_current_thread(&self, key: &K) -> bool {
        self.holder(key) == Some(thread::current().id())
    }

    /// The thread currently holding `key`
    pub fn holder(&self, key: &K) -> Option<ThreadId> {
        self.queues
            .get(key)
            .and_then(|queue| queue.state.lock().waiters.front().copied())
    }

    /// Acquisitions of `key` by the current thread not yet released
    pub fn hold_count(&self, key: &K) -> usize {
        let me = thread::current().id();
        self.queues
            .get(key)
            .map(|queue| {
                let state = queue.state.lock();
                if state.waiters.front() == Some(&me) {
                    state.holds
                } else {
                    0
                }
            })
            .unwrap_or(0)
    }

    /// Threads queued behind the holder of `key`
    pub fn waiting_count(&self, key: &K) -> usize {
        self.queues
            .get(key)
            .map(|queue| queue.state.lock().waiters.len().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Number of keys currently held or waited for
    pub fn locked_keys(&self) -> usize {
        self.queues.len()
    }

    /// Lock `key` and release it when the returned guard is dropped
    pub fn guard(&self, key: &K) -> KeyGuard<'_, K> {
        self.lock(key);
        KeyGuard::new(self, key.clone())
    }

    /// [`Locker::guard`] with a maximum wait time
    pub fn guard_timeout(&self, key: &K, max_wait: Duration) -> Result<KeyGuard<'_, K>, LockError> {
        self.lock_timeout(key, max_wait)?;
        Ok(KeyGuard::new(self, key.clone()))
    }

    /// [`Locker::try_lock`] returning a guard on success
    pub fn try_guard(&self, key: &K) -> Option<KeyGuard<'_, K>> {
        self.try_lock(key).then(|| KeyGuard::new(self, key.clone()))
    }

    /// Run `action` while holding `key`
    ///
    /// The key is released on every exit path, including a panicking action.
    pub fn execute_with_lock<R>(&self, key: &K, action: impl FnOnce() -> R) -> R {
        let _guard = self.guard(key);
        action()
    }

    /// [`Locker::execute_with_lock`] giving up after `max_wait`
    pub fn execute_with_lock_timeout<R>(
        &self,
        key: &K,
        max_wait: Duration,
        action: impl FnOnce() -> R,
    ) -> Result<R, LockError> {
        let _guard = self.guard_timeout(key, max_wait)?;
        Ok(action())
    }

    /// Run `on_acquired` if `key` can be taken without blocking, otherwise
    /// run `on_locked`
    pub fn try_execute_with_lock<R>(
        &self,
        key: &K,
        on_acquired: impl FnOnce() -> R,
        on_locked: impl FnOnce() -> R,
    ) -> R {
        match self.try_guard(key) {
            Some(_guard) => on_acquired(),
            None => on_locked(),
        }
    }

    /// Run `action` if `key` can be taken without blocking, otherwise fail
    /// with the supplied error
    pub fn try_execute_or_else<R, X>(
        &self,
        key: &K,
        action: impl FnOnce() -> R,
        err: impl FnOnce() -> X,
    ) -> Result<R, X> {
        let _guard = self.try_guard(key).ok_or_else(err)?;
        Ok(action())
    }

    /// Run a fallible `action` if `key` can be taken without blocking,
    /// otherwise fail with the supplied error
    pub fn try_execute_checked<R, X>(
        &self,
        key: &K,
        action: impl FnOnce() -> Result<R, X>,
        err: impl FnOnce() -> X,
    ) -> Result<R, X> {
        let _guard = self.try_guard(key).ok_or_else(err)?;
        action()
    }
}

impl<K> KeyLock<K> for Locker<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync,
{
    fn try_lock(&self, key: &K) -> bool {
        Locker::try_lock(self, key)
    }

    fn lock(&self, key: &K) {
        Locker::lock(self, key)
    }

    fn unlock(&self, key: &K) {
        Locker::unlock(self, key)
    }

    fn is_locked(&self, key: &K) -> bool {
        Locker::is_locked(self, key)
    }
}

/// Holds one acquisition of a key and releases it on drop
///
/// Guards are bound to the acquiring thread.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    locker: &'a Locker<K>,
    key: K,
    _not_send: PhantomData<*const ()>,
}

impl<'a, K> KeyGuard<'a, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn new(locker: &'a Locker<K>, key: K) -> Self {
        Self {
            locker,
            key,
            _not_send: PhantomData,
        }
    }

    /// The guarded key
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn drop(&mut self) {
        self.locker.unlock(&self.key);
    }
}
