//! Runner thread body
//!
//! A runner claims one pending item at a time and hands it to the worker
//! under the distributed-lock hooks. Ephemeral runners retire once they stay
//! idle longer than `runner_max_idle_period`; mandatory runners live until
//! the queue stops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, trace, warn};

use super::context::{contain_panic, QueueContext, QueueCounters};
use super::events::QueueEventKind;
use super::registry::{RunnerInfo, RunnerRegistry};
use crate::QueueItem;

/// What happened to a claimed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Processed,
    Failed,
    Skipped,
}

/// Removes the runner from the registry when its thread ends, panics included
struct Registration<'a> {
    registry: &'a RunnerRegistry,
    ordinal: usize,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.ordinal);
    }
}

pub(crate) fn run<E: QueueItem>(ctx: Arc<QueueContext<E>>, info: RunnerInfo) {
    let _span = info_span!(
        "runner",
        queue = %ctx.config.queue_id,
        runner = %info.label,
        ordinal = info.ordinal,
        mandatory = info.mandatory,
    )
    .entered();
    let shared = &ctx.shared;
    let _registration = Registration {
        registry: &shared.registry,
        ordinal: info.ordinal,
    };
    debug!("Runner started");

    let mut idle_since: Option<Instant> = None;
    while !shared.state.is_stopping() {
        match shared.pool.claim() {
            Some(item) => {
                idle_since = None;
                process(&ctx, item);
            }
            None => {
                let since = *idle_since.get_or_insert_with(Instant::now);
                if !info.mandatory && since.elapsed() > ctx.config.runner_max_idle_period {
                    info!(idle = ?since.elapsed(), "Runner idle too long, retiring");
                    break;
                }
                idle_wait(&ctx);
            }
        }
    }

    debug!("Runner exiting");
}

/// Sleep up to `runner_sleep_idle_period`, waking for new items or a stop
fn idle_wait<E: QueueItem>(ctx: &QueueContext<E>) {
    let config = &ctx.config;
    let mut remaining = config.runner_sleep_idle_period;
    while !remaining.is_zero() && !ctx.shared.state.is_stopping() {
        let slice = remaining.min(config.dispatcher_sleep_period);
        if ctx.shared.pool.wait_for_pending(slice) {
            return;
        }
        remaining = remaining.saturating_sub(slice);
    }
}

fn process<E: QueueItem>(ctx: &QueueContext<E>, item: E) {
    let started = Instant::now();
    let outcome = handle(ctx, &item);

    if let Err(panic) = contain_panic(|| ctx.hooks.unlock(&item)) {
        warn!(?item, error = %panic, "Unlock hook panicked");
    }
    ctx.shared.pool.release(&item);
    ctx.listeners.fire(QueueEventKind::RemovedFromQueue, &item);

    let counters = &ctx.shared.counters;
    let counter = match outcome {
        Outcome::Processed => &counters.processed,
        Outcome::Failed => &counters.failed,
        Outcome::Skipped => &counters.skipped,
    };
    QueueCounters::add(counter, 1);
    trace!(?item, ?outcome, elapsed = ?started.elapsed(), "Item done");
}

/// Lock, check and work one item; the unlock hook runs afterwards regardless
fn handle<E: QueueItem>(ctx: &QueueContext<E>, item: &E) -> Outcome {
    match contain_panic(|| ctx.hooks.try_lock(item)) {
        Ok(true) => {}
        Ok(false) => {
            debug!(?item, "Item locked elsewhere, skipped");
            return Outcome::Skipped;
        }
        Err(panic) => {
            warn!(?item, error = %panic, "Lock hook panicked, item skipped");
            return Outcome::Skipped;
        }
    }

    match contain_panic(|| ctx.hooks.integrity_check(item)) {
        Ok(true) => {}
        Ok(false) => {
            debug!(?item, "Integrity check failed, skipped");
            return Outcome::Skipped;
        }
        Err(panic) => {
            warn!(?item, error = %panic, "Integrity check panicked, item skipped");
            return Outcome::Skipped;
        }
    }

    match contain_panic(|| (ctx.worker)(item, &ctx.config)) {
        Ok(Ok(())) => Outcome::Processed,
        Ok(Err(e)) => {
            warn!(?item, error = %e, "Worker failed");
            Outcome::Failed
        }
        Err(panic) => {
            warn!(?item, error = %panic, "Worker panicked");
            Outcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::WrappingCounter;
    use crate::queue::config::QueueConfig;
    use crate::queue::context::QueueShared;
    use crate::queue::events::Listeners;
    use crate::queue::hooks::DistributedHooks;
    use crate::queue::spawn::ThreadSpawner;
    use crate::queue::state::DispatcherState;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use std::thread;

    fn context(
        config: QueueConfig,
        hooks: DistributedHooks<u32>,
        worker: impl Fn(&u32, &QueueConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Arc<QueueContext<u32>> {
        Arc::new(QueueContext {
            config,
            shared: Arc::new(QueueShared::new()),
            supplier: Arc::new(|_: usize| Ok(Vec::new())),
            worker: Arc::new(worker),
            hooks,
            listeners: Listeners::default(),
            spawner: Arc::new(ThreadSpawner::new()),
            runner_name: Arc::new(|_: &crate::RunnerSlot<'_>| "runner".to_string()),
            sequence: WrappingCounter::new(),
        })
    }

    fn config() -> QueueConfig {
        QueueConfig::new()
            .with_dispatcher_sleep_period(Duration::from_millis(5))
            .with_runner_sleep_idle_period(Duration::from_millis(5))
            .with_runner_max_idle_period(Duration::from_millis(30))
    }

    fn runner_info(ordinal: usize, mandatory: bool) -> RunnerInfo {
        RunnerInfo {
            ordinal,
            sequence: 0,
            mandatory,
            label: format!("runner-{ordinal}"),
        }
    }

    #[test]
    fn test_outcomes_and_unlock_always_called() {
        let unlocked = Arc::new(Mutex::new(Vec::new()));
        let unlock_log = Arc::clone(&unlocked);
        let hooks = DistributedHooks::<u32>::new()
            .with_try_lock(|item| *item != 2)
            .with_integrity_check(|item| *item != 3)
            .with_unlock(move |item| unlock_log.lock().push(*item));
        let ctx = context(config(), hooks, |item, _| match item {
            4 => anyhow::bail!("cannot process {item}"),
            5 => panic!("worker bug"),
            _ => Ok(()),
        });

        for item in 1..=5 {
            ctx.shared.pool.offer(item);
            let claimed = ctx.shared.pool.claim().unwrap();
            process(&ctx, claimed);
        }

        let stats = ctx.shared.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(*unlocked.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ephemeral_runner_retires_and_deregisters() {
        let ctx = context(config(), DistributedHooks::new(), |_, _| Ok(()));
        ctx.shared.state.advance(DispatcherState::Started);
        let info = runner_info(1, false);
        ctx.shared.registry.register(info.clone());

        let runner_ctx = Arc::clone(&ctx);
        thread::spawn(move || run(runner_ctx, info)).join().unwrap();
        assert!(ctx.shared.registry.is_empty());
    }

    #[test]
    fn test_mandatory_runner_waits_for_stop() {
        let ctx = context(config(), DistributedHooks::new(), |_, _| Ok(()));
        ctx.shared.state.advance(DispatcherState::Started);
        let info = runner_info(0, true);
        ctx.shared.registry.register(info.clone());

        let runner_ctx = Arc::clone(&ctx);
        let handle = thread::spawn(move || run(runner_ctx, info));

        thread::sleep(Duration::from_millis(100));
        assert_eq!(ctx.shared.registry.len(), 1, "mandatory runner must not retire");

        ctx.shared.pool.offer(9);
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.shared.counters.processed.load(Ordering::Relaxed) == 0
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(ctx.shared.counters.processed.load(Ordering::Relaxed), 1);

        ctx.shared.state.advance(DispatcherState::StopTriggered);
        handle.join().unwrap();
        assert!(ctx.shared.registry.is_empty());
    }
}
