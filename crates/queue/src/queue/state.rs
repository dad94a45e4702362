//! Dispatcher lifecycle
//!
//! ```text
//! ┌─────────┐ start() ┌────────────────┐  thread  ┌─────────┐
//! │ Created │ ──────► │ StartTriggered │ ───────► │ Started │
//! └─────────┘         └────────────────┘          └─────────┘
//!      │                                               │ stop()
//!      │ stop()       ┌─────────┐  runners gone  ┌───────────────┐
//!      └────────────► │ Stopped │ ◄───────────── │ StopTriggered │
//!                     └─────────┘                └───────────────┘
//! ```
//!
//! States only ever move forward.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Dispatcher states, in lifecycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// Constructed, setup may still change
    Created,
    /// `start()` was called, the dispatcher thread is launching
    StartTriggered,
    /// The dispatcher loop is running
    Started,
    /// `stop()` was called, runners are winding down
    StopTriggered,
    /// Dispatcher and all runners have exited
    Stopped,
}

impl DispatcherState {
    /// Whether a stop was requested (or already completed)
    pub fn is_stopping(self) -> bool {
        self >= Self::StopTriggered
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::StartTriggered => write!(f, "start_triggered"),
            Self::Started => write!(f, "started"),
            Self::StopTriggered => write!(f, "stop_triggered"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Monotonic state holder that threads can wait on
#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<DispatcherState>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DispatcherState::Created),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> DispatcherState {
        *self.state.lock()
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.get().is_stopping()
    }

    /// Move to `to` if it lies ahead of the current state
    ///
    /// Returns the state observed before the call.
    pub(crate) fn advance(&self, to: DispatcherState) -> DispatcherState {
        let mut state = self.state.lock();
        let previous = *state;
        if to > previous {
            *state = to;
            self.changed.notify_all();
        }
        previous
    }

    /// Move from exactly `from` to `to`
    pub(crate) fn transition(&self, from: DispatcherState, to: DispatcherState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        self.changed.notify_all();
        true
    }

    /// Block until the state reaches at least `target`
    pub(crate) fn wait_until(&self, target: DispatcherState) {
        let mut state = self.state.lock();
        while *state < target {
            self.changed.wait(&mut state);
        }
    }

    /// Sleep for `period`, waking early once a stop is requested
    ///
    /// Returns `true` if the queue is stopping.
    pub(crate) fn wait_for_stop(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut state = self.state.lock();
        while !state.is_stopping() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.is_stopping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_state_ordering() {
        assert!(DispatcherState::Created < DispatcherState::StartTriggered);
        assert!(DispatcherState::Started < DispatcherState::StopTriggered);
        assert!(!DispatcherState::Started.is_stopping());
        assert!(DispatcherState::StopTriggered.is_stopping());
        assert!(DispatcherState::Stopped.is_stopping());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DispatcherState::Created.to_string(), "created");
        assert_eq!(DispatcherState::StopTriggered.to_string(), "stop_triggered");
        assert_eq!(DispatcherState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let cell = StateCell::new();
        assert_eq!(cell.advance(DispatcherState::StopTriggered), DispatcherState::Created);
        assert_eq!(cell.advance(DispatcherState::Started), DispatcherState::StopTriggered);
        assert_eq!(cell.get(), DispatcherState::StopTriggered);
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let cell = StateCell::new();
        assert!(!cell.transition(DispatcherState::Started, DispatcherState::StopTriggered));
        assert!(cell.transition(DispatcherState::Created, DispatcherState::StartTriggered));
        assert_eq!(cell.get(), DispatcherState::StartTriggered);
    }

    #[test]
    fn test_wait_for_stop_wakes_early() {
        let cell = Arc::new(StateCell::new());
        let stopper = Arc::clone(&cell);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.advance(DispatcherState::StopTriggered);
        });

        let started = Instant::now();
        assert!(cell.wait_for_stop(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_for_stop_times_out() {
        let cell = StateCell::new();
        assert!(!cell.wait_for_stop(Duration::from_millis(10)));
    }
}
