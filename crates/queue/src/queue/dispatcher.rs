//! Scaling worker queue and its dispatcher loop
//!
//! The dispatcher is a single thread that keeps the pending set topped up from
//! the supplier and grows the runner pool with the number of items fetched.
//! Runners shrink the pool themselves by retiring when idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn};

use super::config::{ConfigError, QueueConfig};
use super::context::{
    contain_panic, QueueContext, QueueCounters, QueueShared, QueueStats, SupplierFn, WorkerFn,
};
use super::events::{Listeners, QueueEventKind};
use super::hooks::DistributedHooks;
use super::registry::RunnerInfo;
use super::runner;
use super::spawn::{
    default_dispatcher_name, default_runner_name, DispatcherNameFn, RunnerNameFn, RunnerSlot,
    Spawner, ThreadSpawner,
};
use super::state::DispatcherState;
use crate::counter::WrappingCounter;
use crate::QueueItem;

/// Poll interval while waiting for runners to deregister on shutdown
const RUNNER_EXIT_POLL: Duration = Duration::from_millis(10);

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue setup can only change before start")]
    AlreadyStarted,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("queue cannot start from state {state}")]
    InvalidState { state: DispatcherState },

    #[error("failed to spawn queue thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Setup accepted until the queue starts
struct QueueSetup<E> {
    dispatcher_name: DispatcherNameFn,
    runner_name: RunnerNameFn,
    hooks: DistributedHooks<E>,
    listeners: Listeners<E>,
    spawner: Arc<dyn Spawner>,
}

/// Elastic worker pool fed by a supplier function
///
/// # Example
///
/// ```
/// use scaling_queue::{QueueConfig, ScalingWorkerQueue};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::time::Duration;
///
/// let served = AtomicBool::new(false);
/// let config = QueueConfig::new()
///     .with_dispatcher_sleep_period(Duration::from_millis(10))
///     .with_runner_sleep_idle_period(Duration::from_millis(10));
///
/// let queue = ScalingWorkerQueue::new(
///     config,
///     move |_quota| {
///         let first = !served.swap(true, Ordering::SeqCst);
///         Ok(if first { (0..4).collect::<Vec<u32>>() } else { Vec::new() })
///     },
///     |item: &u32, _config| {
///         println!("processing {item}");
///         Ok(())
///     },
/// )?;
///
/// queue.start(true)?;
/// while queue.stats().processed < 4 {
///     std::thread::sleep(Duration::from_millis(5));
/// }
/// queue.stop(true);
/// assert!(queue.is_stopped());
/// # Ok::<(), scaling_queue::QueueError>(())
/// ```
pub struct ScalingWorkerQueue<E: QueueItem> {
    config: QueueConfig,
    supplier: SupplierFn<E>,
    worker: WorkerFn<E>,
    shared: Arc<QueueShared<E>>,
    setup: Mutex<QueueSetup<E>>,
}

impl<E: QueueItem> ScalingWorkerQueue<E> {
    /// Create a queue; nothing runs until [`start`](Self::start)
    pub fn new<S, W>(config: QueueConfig, supplier: S, worker: W) -> Result<Self, QueueError>
    where
        S: Fn(usize) -> anyhow::Result<Vec<E>> + Send + Sync + 'static,
        W: Fn(&E, &QueueConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            supplier: Arc::new(supplier),
            worker: Arc::new(worker),
            shared: Arc::new(QueueShared::new()),
            setup: Mutex::new(QueueSetup {
                dispatcher_name: default_dispatcher_name(),
                runner_name: default_runner_name(),
                hooks: DistributedHooks::default(),
                listeners: Listeners::default(),
                spawner: Arc::new(ThreadSpawner::default()),
            }),
        })
    }

    /// Name the dispatcher thread from the queue id
    pub fn with_dispatcher_name(
        &self,
        name: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Result<&Self, QueueError> {
        self.configure(|setup| setup.dispatcher_name = Arc::new(name))
    }

    /// Name runner threads; the name also labels the runner's log span
    pub fn with_runner_name(
        &self,
        name: impl Fn(&RunnerSlot<'_>) -> String + Send + Sync + 'static,
    ) -> Result<&Self, QueueError> {
        self.configure(|setup| setup.runner_name = Arc::new(name))
    }

    /// Install distributed-lock hooks
    pub fn with_hooks(&self, hooks: DistributedHooks<E>) -> Result<&Self, QueueError> {
        self.configure(|setup| setup.hooks = hooks)
    }

    /// Register a listener for one kind of item event
    pub fn with_listener(
        &self,
        kind: QueueEventKind,
        listener: impl Fn(&E) + Send + Sync + 'static,
    ) -> Result<&Self, QueueError> {
        self.configure(|setup| setup.listeners.add(kind, Arc::new(listener)))
    }

    /// Replace the thread-spawning strategy
    pub fn with_spawner(&self, spawner: impl Spawner + 'static) -> Result<&Self, QueueError> {
        self.configure(|setup| setup.spawner = Arc::new(spawner))
    }

    fn configure(&self, apply: impl FnOnce(&mut QueueSetup<E>)) -> Result<&Self, QueueError> {
        let mut setup = self.setup.lock();
        if self.shared.state.get() != DispatcherState::Created {
            return Err(QueueError::AlreadyStarted);
        }
        apply(&mut setup);
        Ok(self)
    }

    /// Launch the dispatcher thread
    ///
    /// With `wait`, blocks until the dispatcher loop is running.
    pub fn start(&self, wait: bool) -> Result<(), QueueError> {
        let setup = self.setup.lock();
        if !self
            .shared
            .state
            .transition(DispatcherState::Created, DispatcherState::StartTriggered)
        {
            let state = self.shared.state.get();
            return Err(if state.is_stopping() {
                QueueError::InvalidState { state }
            } else {
                QueueError::AlreadyStarted
            });
        }

        let context = Arc::new(QueueContext {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            supplier: Arc::clone(&self.supplier),
            worker: Arc::clone(&self.worker),
            hooks: setup.hooks.clone(),
            listeners: setup.listeners.clone(),
            spawner: Arc::clone(&setup.spawner),
            runner_name: Arc::clone(&setup.runner_name),
            sequence: WrappingCounter::new(),
        });
        let name = (setup.dispatcher_name)(&self.config.queue_id);
        drop(setup);

        info!(queue = %self.config.queue_id, thread = %name, "Starting queue");
        debug!(
            queue = %self.config.queue_id,
            added_listeners = context.listeners.len(QueueEventKind::AddedToQueue),
            removed_listeners = context.listeners.len(QueueEventKind::RemovedFromQueue),
            "Queue setup frozen"
        );
        let dispatcher = Arc::clone(&context);
        if let Err(e) = context
            .spawner
            .spawn(name, Box::new(move || run(dispatcher)))
        {
            error!(queue = %self.config.queue_id, error = %e, "Failed to spawn dispatcher");
            self.shared.state.advance(DispatcherState::Stopped);
            return Err(QueueError::Spawn(e));
        }

        if wait {
            self.shared.state.wait_until(DispatcherState::Started);
        }
        Ok(())
    }

    /// Ask the dispatcher and all runners to stop
    ///
    /// Running worker calls finish first. With `wait`, blocks until every
    /// thread of the queue has exited; do not wait from inside a worker,
    /// supplier, hook or listener.
    pub fn stop(&self, wait: bool) {
        let state = &self.shared.state;
        if state.transition(DispatcherState::Created, DispatcherState::Stopped) {
            info!(queue = %self.config.queue_id, "Queue stopped before start");
            return;
        }

        if state.advance(DispatcherState::StopTriggered) < DispatcherState::StopTriggered {
            info!(queue = %self.config.queue_id, "Stop triggered");
        }
        self.shared.pool.wake_all();

        if wait {
            state.wait_until(DispatcherState::Stopped);
            info!(queue = %self.config.queue_id, "Queue stopped");
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.shared.state.get()
    }

    /// Whether the dispatcher loop is running
    pub fn is_started(&self) -> bool {
        self.state() == DispatcherState::Started
    }

    /// Whether the dispatcher and all runners have exited
    pub fn is_stopped(&self) -> bool {
        self.state() == DispatcherState::Stopped
    }

    pub fn runners_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Live runners ordered by ordinal
    pub fn runners(&self) -> Vec<RunnerInfo> {
        self.shared.registry.snapshot()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl<E: QueueItem> Drop for ScalingWorkerQueue<E> {
    fn drop(&mut self) {
        if !self.shared.state.is_stopping() {
            self.stop(false);
        }
    }
}

/// Dispatcher thread body
fn run<E: QueueItem>(ctx: Arc<QueueContext<E>>) {
    let _span = info_span!("dispatcher", queue = %ctx.config.queue_id).entered();
    let shared = &ctx.shared;
    shared.state.advance(DispatcherState::Started);
    info!("Dispatcher started");

    let mut idle_until: Option<Instant> = None;
    while !shared.state.is_stopping() {
        let cycle = contain_panic(|| dispatch_cycle(&ctx, &mut idle_until))
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("dispatcher panicked: {panic}")));

        if let Err(e) = cycle {
            let backoff = ctx.config.error_backoff();
            error!(error = %e, ?backoff, "Dispatch cycle failed, backing off");
            idle_until = None;
            shared.state.wait_for_stop(backoff);
        }
    }

    info!(runners = shared.registry.len(), "Dispatcher stopping, waiting for runners");
    shared.pool.wake_all();
    shared.registry.wait_until_empty(RUNNER_EXIT_POLL);
    shared.state.advance(DispatcherState::Stopped);
    info!("Dispatcher stopped");
}

/// One fetch, scale and throttle cycle
fn dispatch_cycle<E: QueueItem>(
    ctx: &Arc<QueueContext<E>>,
    idle_until: &mut Option<Instant>,
) -> anyhow::Result<()> {
    let shared = &ctx.shared;
    let config = &ctx.config;

    let quota = config.fetch_quota(shared.registry.len());
    let items = (ctx.supplier)(quota)?;
    let fetched = items.len();
    QueueCounters::add(&shared.counters.fetched, fetched as u64);

    let mut added = 0u64;
    for item in items {
        if shared.pool.reserve(&item) {
            added += 1;
            ctx.listeners.fire(QueueEventKind::AddedToQueue, &item);
            shared.pool.publish(item);
        } else {
            debug!(?item, "Item already queued, dropped");
        }
    }
    QueueCounters::add(&shared.counters.added, added);

    if added == 0 {
        *idle_until = Some(Instant::now() + config.dispatcher_wait_period_on_empty_fetch);
    } else {
        *idle_until = None;
        debug!(quota, fetched, added, "Fetched items");
    }

    let mut target = config.scale_target(fetched);
    // without mandatory runners a trickle of items still needs one runner
    if target == 0 && shared.pool.pending_len() > 0 {
        target = 1;
    }
    while shared.registry.len() < target && !shared.state.is_stopping() {
        spawn_runner(ctx)?;
    }

    throttle(ctx, *idle_until);
    Ok(())
}

/// Sleep while enough items are pending or an empty-fetch wait is armed
fn throttle<E: QueueItem>(ctx: &QueueContext<E>, idle_until: Option<Instant>) {
    let config = &ctx.config;
    loop {
        let period = match idle_until {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return;
                }
                remaining.min(config.dispatcher_sleep_period)
            }
            None if ctx.shared.pool.pending_len() >= config.spare_elements_count_to_supply
                && !ctx.shared.registry.is_empty() =>
            {
                config.dispatcher_sleep_period
            }
            None => return,
        };
        if ctx.shared.state.wait_for_stop(period) {
            return;
        }
    }
}

fn spawn_runner<E: QueueItem>(ctx: &Arc<QueueContext<E>>) -> Result<(), QueueError> {
    let registry = &ctx.shared.registry;
    let ordinal = registry.next_free_ordinal();
    let sequence = ctx.sequence.get_and_increment();
    let mandatory = ctx.config.is_mandatory(ordinal);
    let label = (ctx.runner_name)(&RunnerSlot {
        queue_id: &ctx.config.queue_id,
        ordinal,
        sequence,
        mandatory,
    });

    let info = RunnerInfo {
        ordinal,
        sequence,
        mandatory,
        label: label.clone(),
    };
    registry.register(info.clone());

    let runner_ctx = Arc::clone(ctx);
    if let Err(e) = ctx
        .spawner
        .spawn(label, Box::new(move || runner::run(runner_ctx, info)))
    {
        registry.deregister(ordinal);
        warn!(ordinal, error = %e, "Failed to spawn runner");
        return Err(QueueError::Spawn(e));
    }

    info!(ordinal, sequence, mandatory, runners = registry.len(), "Runner spawned");
    Ok(())
}
