//! # Scaling Worker Queue
//!
//! An elastic worker-pool dispatcher paired with a reentrant per-key locker.
//!
//! ## Features
//!
//! - **Supplier-driven fetching**: a caller function hands out candidate items in batches
//! - **In-flight deduplication**: an item is never pending and in flight at once
//! - **Elastic runners**: threads are added with load and retire after sustained idleness
//! - **Distributed hooks**: lock/unlock/integrity-check functions extend exclusivity across processes
//! - **Per-key locking**: [`Locker`] grants keys FIFO, reentrantly, with optional timeouts
//!
//! ## Example
//!
//! ```
//! use scaling_queue::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let locker = Arc::new(Locker::new());
//! let config = QueueConfig::new()
//!     .with_queue_id("invoices")
//!     .with_runner_bounds(1, 4)
//!     .with_dispatcher_sleep_period(Duration::from_millis(10));
//!
//! let queue = ScalingWorkerQueue::new(
//!     config,
//!     |quota| Ok((0..quota as u64).collect::<Vec<_>>()),
//!     |invoice: &u64, _config: &QueueConfig| {
//!         println!("sending invoice {invoice}");
//!         Ok(())
//!     },
//! )?;
//! queue.with_hooks(DistributedHooks::from_key_lock(locker))?;
//!
//! queue.start(true)?;
//! queue.stop(true);
//! # Ok::<(), QueueError>(())
//! ```

use std::fmt::Debug;
use std::hash::Hash;

pub mod counter;
pub mod locker;
pub mod queue;

/// Prelude for common imports
pub mod prelude {
    pub use crate::locker::{KeyGuard, KeyLock, LockError, Locker};
    pub use crate::queue::{
        DistributedHooks, DispatcherState, QueueConfig, QueueError, QueueEventKind, QueueStats,
        ScalingWorkerQueue,
    };
    pub use crate::QueueItem;
}

// Re-export key types at crate root
pub use counter::{CounterError, WrappingCounter};
pub use locker::{KeyGuard, KeyLock, LockError, Locker};
pub use queue::{
    ConfigError, DispatcherState, DistributedHooks, QueueConfig, QueueError, QueueEventKind,
    QueueStats, RunnerInfo, RunnerSlot, ScalingWorkerQueue, Spawner, ThreadSpawner,
};

/// Items a [`ScalingWorkerQueue`] can carry
///
/// Equality decides deduplication against the pending and in-flight sets.
pub trait QueueItem: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> QueueItem for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
