//! Scaling worker queue
//!
//! This module provides:
//! - [`ScalingWorkerQueue`] - Supplier-fed worker pool with elastic runner threads
//! - [`QueueConfig`] - Fetch sizing, runner bounds and sleep/idle periods
//! - [`DistributedHooks`] - Lock/unlock/integrity-check hooks for multi-process use
//! - [`Spawner`] - Thread-spawning strategy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ScalingWorkerQueue                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  Dispatcher thread                                    │   │
//! │  │  supplier(quota) → dedup → pending set → scale up     │   │
//! │  └──────────────────────────┬───────────────────────────┘   │
//! │                             │                                │
//! │                             ▼                                │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  ItemPool: pending ──claim──► in-flight               │   │
//! │  └──────────────────────────┬───────────────────────────┘   │
//! │                             │                                │
//! │                             ▼                                │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  Runner threads (min..=max)                           │   │
//! │  │  try_lock → integrity_check → worker → unlock         │   │
//! │  │  [mandatory 0] .. [ephemeral N, retires when idle]    │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod context;
mod dispatcher;
mod events;
mod hooks;
mod pool;
mod registry;
mod runner;
mod spawn;
mod state;

pub use config::{ConfigError, QueueConfig};
pub use context::{QueueStats, SupplierFn, WorkerFn};
pub use dispatcher::{QueueError, ScalingWorkerQueue};
pub use events::{ListenerFn, QueueEventKind};
pub use hooks::{DistributedHooks, IntegrityCheckFn, TryLockFn, UnlockFn};
pub use registry::RunnerInfo;
pub use spawn::{DispatcherNameFn, RunnerNameFn, RunnerSlot, Spawner, Task, ThreadSpawner};
pub use state::DispatcherState;
