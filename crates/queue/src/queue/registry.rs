//! Registry of live runner threads
//!
//! The dispatcher is the only thread that registers runners; every runner
//! removes its own entry when it exits.

use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

/// Description of one live runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerInfo {
    /// Slot in the registry; the first `min_runner_count` slots are mandatory
    pub ordinal: usize,
    /// Spawn sequence number of this runner
    pub sequence: u64,
    /// Mandatory runners never retire from idleness
    pub mandatory: bool,
    /// Thread and log label
    pub label: String,
}

pub(crate) struct RunnerRegistry {
    runners: DashMap<usize, RunnerInfo>,
}

impl RunnerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            runners: DashMap::new(),
        }
    }

    /// Lowest ordinal not taken by a live runner
    pub(crate) fn next_free_ordinal(&self) -> usize {
        let live = self.runners.len();
        (0..=live)
            .find(|ordinal| !self.runners.contains_key(ordinal))
            .unwrap_or(live)
    }

    pub(crate) fn register(&self, info: RunnerInfo) {
        self.runners.insert(info.ordinal, info);
    }

    pub(crate) fn deregister(&self, ordinal: usize) -> Option<RunnerInfo> {
        self.runners.remove(&ordinal).map(|(_, info)| info)
    }

    pub(crate) fn len(&self) -> usize {
        self.runners.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Live runners ordered by ordinal
    pub(crate) fn snapshot(&self) -> Vec<RunnerInfo> {
        let mut runners: Vec<RunnerInfo> = self
            .runners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        runners.sort_by_key(|info| info.ordinal);
        runners
    }

    /// Block until every runner has deregistered
    pub(crate) fn wait_until_empty(&self, poll: Duration) {
        while !self.is_empty() {
            thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ordinal: usize) -> RunnerInfo {
        RunnerInfo {
            ordinal,
            sequence: ordinal as u64,
            mandatory: ordinal == 0,
            label: format!("runner-{ordinal}"),
        }
    }

    #[test]
    fn test_next_free_ordinal_fills_gaps() {
        let registry = RunnerRegistry::new();
        assert_eq!(registry.next_free_ordinal(), 0);

        for ordinal in 0..3 {
            registry.register(info(ordinal));
        }
        assert_eq!(registry.next_free_ordinal(), 3);

        registry.deregister(1);
        assert_eq!(registry.next_free_ordinal(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let registry = RunnerRegistry::new();
        for ordinal in [2, 0, 1] {
            registry.register(info(ordinal));
        }
        let ordinals: Vec<_> = registry.snapshot().iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_wait_until_empty() {
        let registry = std::sync::Arc::new(RunnerRegistry::new());
        registry.register(info(0));

        let other = std::sync::Arc::clone(&registry);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.deregister(0)
        });

        registry.wait_until_empty(Duration::from_millis(1));
        assert!(registry.is_empty());
        assert_eq!(handle.join().unwrap(), Some(info(0)));
    }
}
