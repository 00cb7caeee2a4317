//! Atomic helpers for statistics and counters.

use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicUsize, Ordering};

/// A monotonically increasing event counter.
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a new counter.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Increment the counter.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// An atomic gauge for values that go up and down.
pub struct AtomicGauge(AtomicUsize);

impl AtomicGauge {
    /// Create a new gauge.
    pub const fn new(initial: usize) -> Self {
        Self(AtomicUsize::new(initial))
    }

    /// Add to the gauge.
    pub fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    /// Subtract from the gauge.
    pub fn sub(&self, value: usize) {
        self.0.fetch_sub(value, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicGauge {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A signed gauge for live-byte accounting.
///
/// Goes negative when frees outpace tracked allocations, e.g. when memory
/// allocated before `init()` is released afterwards.
pub struct SignedGauge(AtomicIsize);

impl SignedGauge {
    /// Create a new gauge.
    pub const fn new(initial: isize) -> Self {
        Self(AtomicIsize::new(initial))
    }

    /// Add to the gauge.
    pub fn add(&self, value: usize) {
        self.0.fetch_add(value as isize, Ordering::Relaxed);
    }

    /// Subtract from the gauge.
    pub fn sub(&self, value: usize) {
        self.0.fetch_sub(value as isize, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> isize {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for SignedGauge {
    fn default() -> Self {
        Self::new(0)
    }
}
