//! # SafeCounter
//!
//! Lock-free integer counter.

use std::sync::atomic::{AtomicI64, Ordering};

/// A signed counter that any number of tasks can update without a lock.
///
/// Mutating operations return the value after the update.
#[derive(Debug, Default)]
pub struct SafeCounter {
    value: AtomicI64,
}

impl SafeCounter {
    pub const fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    #[inline]
    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    #[inline]
    pub fn decrement(&self) -> i64 {
        self.add(-1)
    }

    #[inline]
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Stores `value`, returning the previous value.
    #[inline]
    pub fn set(&self, value: i64) -> i64 {
        self.value.swap(value, Ordering::SeqCst)
    }

    /// Stores zero, returning the previous value.
    #[inline]
    pub fn reset(&self) -> i64 {
        self.set(0)
    }
}
