//! Thread spawning and naming

use std::io;
use std::sync::Arc;
use std::thread;

/// Work handed to a [`Spawner`]
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Strategy used to start the dispatcher and runner threads
///
/// The task must run on its own thread; it blocks until the queue stops or
/// the runner retires.
pub trait Spawner: Send + Sync {
    /// Start `task` on a new thread called `name`
    fn spawn(&self, name: String, task: Task) -> io::Result<()>;
}

/// Default spawner backed by [`std::thread::Builder`]
#[derive(Debug, Clone, Default)]
pub struct ThreadSpawner {
    stack_size: Option<usize>,
}

impl ThreadSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size in bytes for every spawned thread
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Spawner for ThreadSpawner {
    fn spawn(&self, name: String, task: Task) -> io::Result<()> {
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        // Detached; the dispatcher tracks runners through the registry
        builder.spawn(task).map(drop)
    }
}

/// Identity of a runner about to be spawned, passed to the naming function
#[derive(Debug, Clone, Copy)]
pub struct RunnerSlot<'a> {
    pub queue_id: &'a str,
    pub ordinal: usize,
    pub sequence: u64,
    pub mandatory: bool,
}

/// Names the dispatcher thread from the queue id
pub type DispatcherNameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Names a runner thread
pub type RunnerNameFn = Arc<dyn Fn(&RunnerSlot<'_>) -> String + Send + Sync>;

pub(crate) fn default_dispatcher_name() -> DispatcherNameFn {
    fn name(queue_id: &str) -> String {
        format!("{queue_id}-dispatcher")
    }
    Arc::new(name)
}

pub(crate) fn default_runner_name() -> RunnerNameFn {
    fn name(slot: &RunnerSlot<'_>) -> String {
        format!("{}-runner-{}", slot.queue_id, slot.sequence)
    }
    Arc::new(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_thread_spawner_names_thread() {
        let (tx, rx) = mpsc::channel();
        ThreadSpawner::new()
            .with_stack_size(256 * 1024)
            .spawn(
                "orders-runner-0".to_string(),
                Box::new(move || {
                    let name = thread::current().name().map(str::to_string);
                    tx.send(name).unwrap();
                }),
            )
            .unwrap();

        assert_eq!(rx.recv().unwrap().as_deref(), Some("orders-runner-0"));
    }

    #[test]
    fn test_default_names() {
        let slot = RunnerSlot {
            queue_id: "orders",
            ordinal: 1,
            sequence: 7,
            mandatory: false,
        };
        assert_eq!(default_dispatcher_name()("orders"), "orders-dispatcher");
        assert_eq!(default_runner_name()(&slot), "orders-runner-7");
    }
}
