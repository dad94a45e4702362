//! State shared between the queue handle, its dispatcher and its runners

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::config::QueueConfig;
use super::events::Listeners;
use super::hooks::DistributedHooks;
use super::pool::ItemPool;
use super::registry::RunnerRegistry;
use super::spawn::{RunnerNameFn, Spawner};
use super::state::{DispatcherState, StateCell};
use crate::counter::WrappingCounter;
use crate::QueueItem;

/// Produces up to the requested number of candidate items
pub type SupplierFn<E> = Arc<dyn Fn(usize) -> anyhow::Result<Vec<E>> + Send + Sync>;

/// Processes one item
pub type WorkerFn<E> = Arc<dyn Fn(&E, &QueueConfig) -> anyhow::Result<()> + Send + Sync>;

/// Point-in-time view of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub state: DispatcherState,
    /// Live runner threads
    pub runners: usize,
    /// Items waiting for a runner
    pub pending: usize,
    /// Items claimed by a runner
    pub in_flight: usize,
    /// Items returned by the supplier, duplicates included
    pub fetched: u64,
    /// Items that entered the pending set
    pub added: u64,
    /// Worker calls that succeeded
    pub processed: u64,
    /// Worker calls that returned an error or panicked
    pub failed: u64,
    /// Items dropped by the lock or integrity-check hook
    pub skipped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub(crate) fetched: AtomicU64,
    pub(crate) added: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) skipped: AtomicU64,
}

impl QueueCounters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Live state, created with the handle and outliving it while threads run
pub(crate) struct QueueShared<E> {
    pub(crate) state: StateCell,
    pub(crate) pool: ItemPool<E>,
    pub(crate) registry: RunnerRegistry,
    pub(crate) counters: QueueCounters,
}

impl<E: QueueItem> QueueShared<E> {
    pub(crate) fn new() -> Self {
        Self {
            state: StateCell::new(),
            pool: ItemPool::new(),
            registry: RunnerRegistry::new(),
            counters: QueueCounters::default(),
        }
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        QueueStats {
            state: self.state.get(),
            runners: self.registry.len(),
            pending: self.pool.pending_len(),
            in_flight: self.pool.in_flight_len(),
            fetched: load(&self.counters.fetched),
            added: load(&self.counters.added),
            processed: load(&self.counters.processed),
            failed: load(&self.counters.failed),
            skipped: load(&self.counters.skipped),
        }
    }
}

/// Frozen setup plus live state, handed to every thread of a started queue
pub(crate) struct QueueContext<E> {
    pub(crate) config: QueueConfig,
    pub(crate) shared: Arc<QueueShared<E>>,
    pub(crate) supplier: SupplierFn<E>,
    pub(crate) worker: WorkerFn<E>,
    pub(crate) hooks: DistributedHooks<E>,
    pub(crate) listeners: Listeners<E>,
    pub(crate) spawner: Arc<dyn Spawner>,
    pub(crate) runner_name: RunnerNameFn,
    /// Spawn sequence of runners
    pub(crate) sequence: WrappingCounter,
}

/// Run `f`, turning a panic into an error message
pub(crate) fn contain_panic<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
