// Synthetic item source for the CLI
//
// Items are ids 1..=total, each served once. Processing sleeps for the
// configured work time and fails for every N-th id when asked to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

pub struct DemoSource {
    total: u64,
    next: AtomicU64,
    work: Duration,
    fail_every: Option<u64>,
}

impl DemoSource {
    pub fn new(total: u64, work: Duration, fail_every: Option<u64>) -> Self {
        Self {
            total,
            next: AtomicU64::new(1),
            work,
            fail_every,
        }
    }

    /// Hand out up to `quota` ids not served before
    pub fn fetch(&self, quota: usize) -> Vec<u64> {
        let last = self.total + 1;
        let start = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                Some(next.saturating_add(quota as u64).min(last))
            })
            .unwrap_or(last);
        let end = start.saturating_add(quota as u64).min(last);
        (start..end).collect()
    }

    pub fn process(&self, item: u64) -> anyhow::Result<()> {
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        if let Some(every) = self.fail_every {
            if item % every == 0 {
                anyhow::bail!("simulated failure for item {item}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_serves_each_item_once() {
        let source = DemoSource::new(5, Duration::ZERO, None);
        assert_eq!(source.fetch(3), vec![1, 2, 3]);
        assert_eq!(source.fetch(3), vec![4, 5]);
        assert!(source.fetch(3).is_empty());
    }

    #[test]
    fn test_process_fails_every_nth_item() {
        let source = DemoSource::new(10, Duration::ZERO, Some(3));
        assert!(source.process(1).is_ok());
        assert!(source.process(3).is_err());
        assert!(source.process(6).is_err());
        assert!(DemoSource::new(10, Duration::ZERO, None).process(3).is_ok());
    }
}
