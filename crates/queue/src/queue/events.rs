//! Item lifecycle events
//!
//! Listeners are registered per event kind before the queue starts. They run
//! on the thread that caused the event (the dispatcher for
//! [`QueueEventKind::AddedToQueue`], a runner for
//! [`QueueEventKind::RemovedFromQueue`]) and should return quickly.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::context::panic_message;

/// Kinds of item events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueEventKind {
    /// A fetched item entered the pending set
    AddedToQueue,
    /// A claimed item left the in-flight set, whatever the outcome
    RemovedFromQueue,
}

impl fmt::Display for QueueEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddedToQueue => write!(f, "ADDED_TO_QUEUE"),
            Self::RemovedFromQueue => write!(f, "REMOVED_FROM_QUEUE"),
        }
    }
}

/// Listener callback
pub type ListenerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub(crate) struct Listeners<E> {
    added: Vec<ListenerFn<E>>,
    removed: Vec<ListenerFn<E>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            added: self.added.clone(),
            removed: self.removed.clone(),
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<E: fmt::Debug> Listeners<E> {
    pub(crate) fn add(&mut self, kind: QueueEventKind, listener: ListenerFn<E>) {
        match kind {
            QueueEventKind::AddedToQueue => self.added.push(listener),
            QueueEventKind::RemovedFromQueue => self.removed.push(listener),
        }
    }

    pub(crate) fn len(&self, kind: QueueEventKind) -> usize {
        match kind {
            QueueEventKind::AddedToQueue => self.added.len(),
            QueueEventKind::RemovedFromQueue => self.removed.len(),
        }
    }

    /// Notify every listener of `kind`; a panicking listener is logged and skipped
    pub(crate) fn fire(&self, kind: QueueEventKind, item: &E) {
        let listeners = match kind {
            QueueEventKind::AddedToQueue => &self.added,
            QueueEventKind::RemovedFromQueue => &self.removed,
        };
        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(item))) {
                warn!(
                    event = %kind,
                    ?item,
                    error = %panic_message(payload.as_ref()),
                    "Queue listener panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(QueueEventKind::AddedToQueue.to_string(), "ADDED_TO_QUEUE");
        assert_eq!(
            serde_json::to_string(&QueueEventKind::RemovedFromQueue).unwrap(),
            "\"REMOVED_FROM_QUEUE\""
        );
    }

    #[test]
    fn test_fire_only_matching_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();

        let added = Arc::clone(&seen);
        listeners.add(
            QueueEventKind::AddedToQueue,
            Arc::new(move |item: &u32| added.lock().push(("added", *item))),
        );
        let removed = Arc::clone(&seen);
        listeners.add(
            QueueEventKind::RemovedFromQueue,
            Arc::new(move |item: &u32| removed.lock().push(("removed", *item))),
        );

        listeners.fire(QueueEventKind::AddedToQueue, &1);
        listeners.fire(QueueEventKind::RemovedFromQueue, &1);
        listeners.fire(QueueEventKind::AddedToQueue, &2);

        assert_eq!(
            *seen.lock(),
            vec![("added", 1), ("removed", 1), ("added", 2)]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let calls = Arc::new(Mutex::new(0));
        let mut listeners = Listeners::default();
        listeners.add(
            QueueEventKind::AddedToQueue,
            Arc::new(|_: &u32| panic!("listener failure")),
        );
        let counter = Arc::clone(&calls);
        listeners.add(
            QueueEventKind::AddedToQueue,
            Arc::new(move |_: &u32| *counter.lock() += 1),
        );

        listeners.fire(QueueEventKind::AddedToQueue, &7);
        assert_eq!(*calls.lock(), 1);
        assert_eq!(listeners.len(QueueEventKind::AddedToQueue), 2);
        assert_eq!(listeners.len(QueueEventKind::RemovedFromQueue), 0);
    }
}
