//! Pending and in-flight item space
//!
//! Both sets live behind one mutex so that claiming (pending → in-flight)
//! is a single indivisible step for all runners.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct PoolInner<E> {
    /// Fetch order, used as a soft priority
    pending: VecDeque<E>,
    pending_index: HashSet<E>,
    in_flight: HashSet<E>,
}

/// Deduplicating item pool shared by the dispatcher and its runners
pub(crate) struct ItemPool<E> {
    inner: Mutex<PoolInner<E>>,
    available: Condvar,
}

impl<E> ItemPool<E>
where
    E: Clone + Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                pending: VecDeque::new(),
                pending_index: HashSet::new(),
                in_flight: HashSet::new(),
            }),
            available: Condvar::new(),
        }
    }

    /// Mark `item` as queued unless it is already pending or in flight
    ///
    /// A reserved item blocks duplicates but is not claimable until it is
    /// handed to [`ItemPool::publish`].
    pub(crate) fn reserve(&self, item: &E) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending_index.contains(item) || inner.in_flight.contains(item) {
            return false;
        }
        inner.pending_index.insert(item.clone());
        true
    }

    /// Make a reserved item claimable and wake one runner
    pub(crate) fn publish(&self, item: E) {
        self.inner.lock().pending.push_back(item);
        self.available.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn offer(&self, item: E) -> bool {
        if !self.reserve(&item) {
            return false;
        }
        self.publish(item);
        true
    }

    /// Move the next pending item into the in-flight set
    pub(crate) fn claim(&self) -> Option<E> {
        let mut inner = self.inner.lock();
        let item = inner.pending.pop_front()?;
        inner.pending_index.remove(&item);
        inner.in_flight.insert(item.clone());
        Some(item)
    }

    /// Drop a claimed item from the in-flight set
    pub(crate) fn release(&self, item: &E) -> bool {
        self.inner.lock().in_flight.remove(item)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Wait up to `timeout` for a pending item to show up
    ///
    /// Returns `true` if items are pending.
    pub(crate) fn wait_for_pending(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.pending.is_empty() {
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        !inner.pending.is_empty()
    }

    /// Wake every runner waiting for items
    pub(crate) fn wake_all(&self) {
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_offer_deduplicates_pending_and_in_flight() {
        let pool = ItemPool::new();
        assert!(pool.offer(1));
        assert!(!pool.offer(1));

        assert_eq!(pool.claim(), Some(1));
        assert!(!pool.offer(1), "in-flight item must not be re-added");

        assert!(pool.release(&1));
        assert!(pool.offer(1), "released item may be fetched again");
    }

    #[test]
    fn test_claim_moves_item_in_fetch_order() {
        let pool = ItemPool::new();
        for item in ["a", "b", "c"] {
            pool.offer(item);
        }

        assert_eq!(pool.claim(), Some("a"));
        assert_eq!(pool.pending_len(), 2);
        assert_eq!(pool.in_flight_len(), 1);
        assert_eq!(pool.claim(), Some("b"));
        assert_eq!(pool.claim(), Some("c"));
        assert_eq!(pool.claim(), None);
        assert_eq!(pool.in_flight_len(), 3);
    }

    #[test]
    fn test_reserved_item_is_not_claimable_until_published() {
        let pool = ItemPool::new();
        assert!(pool.reserve(&4u32));
        assert!(!pool.reserve(&4), "reserved item must not be queued twice");
        assert_eq!(pool.claim(), None);
        assert_eq!(pool.pending_len(), 0);

        pool.publish(4);
        assert_eq!(pool.pending_len(), 1);
        assert_eq!(pool.claim(), Some(4));
    }

    #[test]
    fn test_release_unknown_item() {
        let pool: ItemPool<u8> = ItemPool::new();
        assert!(!pool.release(&9));
    }

    #[test]
    fn test_concurrent_claims_never_share_an_item() {
        let pool = Arc::new(ItemPool::new());
        for item in 0..1000u32 {
            pool.offer(item);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(item) = pool.claim() {
                        claimed.push(item);
                    }
                    claimed
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_wait_for_pending_wakes_on_offer() {
        let pool = Arc::new(ItemPool::new());
        let producer = Arc::clone(&pool);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.offer(7u32);
        });

        assert!(pool.wait_for_pending(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(!ItemPool::<u32>::new().wait_for_pending(Duration::from_millis(5)));
    }
}
