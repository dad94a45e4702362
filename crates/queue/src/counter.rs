//! Lock-free counter wrapping within a fixed range

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CounterError {
    /// The initial value is above the maximum
    #[error("initial value {initial} must not be larger than max value {max}")]
    InvalidRange {
        /// Requested initial value
        initial: u64,
        /// Requested maximum value
        max: u64,
    },

    /// A value outside `[initial, max]` was set
    #[error("value {value} is outside of [{initial}, {max}]")]
    OutOfRange {
        /// Rejected value
        value: u64,
        /// Lower bound
        initial: u64,
        /// Upper bound
        max: u64,
    },
}

/// Atomic counter that wraps from `max` back to `initial` (and from
/// `initial` down to `max`)
///
/// # Example
///
/// ```
/// use scaling_queue::WrappingCounter;
///
/// let counter = WrappingCounter::with_range(2, 0).unwrap();
/// assert_eq!(counter.get_and_increment(), 0);
/// assert_eq!(counter.get_and_increment(), 1);
/// assert_eq!(counter.get_and_increment(), 2);
/// assert_eq!(counter.get(), 0);
/// ```
pub struct WrappingCounter {
    value: AtomicU64,
    initial: u64,
    max: u64,
}

impl Default for WrappingCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WrappingCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappingCounter")
            .field("value", &self.get())
            .field("initial", &self.initial)
            .field("max", &self.max)
            .finish()
    }
}

impl fmt::Display for WrappingCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl WrappingCounter {
    /// Counter over `[0, u64::MAX]`
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            initial: 0,
            max: u64::MAX,
        }
    }

    /// Counter over `[initial, max]`, starting at `initial`
    pub fn with_range(max: u64, initial: u64) -> Result<Self, CounterError> {
        if initial > max {
            return Err(CounterError::InvalidRange { initial, max });
        }
        Ok(Self {
            value: AtomicU64::new(initial),
            initial,
            max,
        })
    }

    fn next(&self, value: u64) -> u64 {
        if value >= self.max {
            self.initial
        } else {
            value + 1
        }
    }

    fn previous(&self, value: u64) -> u64 {
        if value <= self.initial {
            self.max
        } else {
            value - 1
        }
    }

    fn update(&self, f: impl Fn(u64) -> u64) -> (u64, u64) {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let new = f(current);
            match self
                .value
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return (current, new),
                Err(actual) => current = actual,
            }
        }
    }

    /// Increment, returning the previous value
    pub fn get_and_increment(&self) -> u64 {
        self.update(|v| self.next(v)).0
    }

    /// Increment, returning the new value
    pub fn increment_and_get(&self) -> u64 {
        self.update(|v| self.next(v)).1
    }

    /// Decrement, returning the previous value
    pub fn get_and_decrement(&self) -> u64 {
        self.update(|v| self.previous(v)).0
    }

    /// Decrement, returning the new value
    pub fn decrement_and_get(&self) -> u64 {
        self.update(|v| self.previous(v)).1
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Overwrite the value; it must lie within the counter's range
    pub fn set(&self, value: u64) -> Result<(), CounterError> {
        if value < self.initial || value > self.max {
            return Err(CounterError::OutOfRange {
                value,
                initial: self.initial,
                max: self.max,
            });
        }
        self.value.store(value, Ordering::Release);
        Ok(())
    }
}
