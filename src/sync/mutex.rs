//! The aggregation lock.
//!
//! One mutex serializes every consumer pass and every snapshot read, so
//! its implementation is worth a feature flag: `parking_lot` swaps in a
//! faster, non-poisoning mutex.

#[cfg(feature = "parking_lot")]
type Inner<T> = parking_lot::Mutex<T>;
#[cfg(not(feature = "parking_lot"))]
type Inner<T> = std::sync::Mutex<T>;

#[cfg(feature = "parking_lot")]
type InnerGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
#[cfg(not(feature = "parking_lot"))]
type InnerGuard<'a, T> = std::sync::MutexGuard<'a, T>;

/// Mutex over either backend with one locking surface.
pub struct Mutex<T> {
    inner: Inner<T>,
}

impl<T> Mutex<T> {
    /// Create a new mutex.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Inner::new(value),
        }
    }

    /// Lock, blocking until acquired.
    ///
    /// With the std backend a poisoned lock is taken over rather than
    /// propagated: the aggregate state is all plain counters and index
    /// links, and a panicking consumer leaves them stale, not unsound.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        #[cfg(feature = "parking_lot")]
        let guard = self.inner.lock();
        #[cfg(not(feature = "parking_lot"))]
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        MutexGuard { guard }
    }
}

/// Guard over either backend.
pub struct MutexGuard<'a, T> {
    guard: InnerGuard<'a, T>,
}

impl<'a, T> std::ops::Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<'a, T> std::ops::DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
