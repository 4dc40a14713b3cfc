//! Cooperative shutdown signalling for background threads.
//!
//! There is no cancellation primitive in the engine: background threads (GC,
//! log flusher, checkpointer, workers) observe this flag between iterations
//! and exit cleanly once it is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Cloneable stop token shared between an owner and its background threads.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl ShutdownFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every thread parked in [`Self::wait_timeout`].
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::Release);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    #[inline]
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Park for up to `period` or until shutdown is requested, whichever
    /// comes first. Returns `true` if shutdown was requested.
    ///
    /// Background loops use this instead of a bare sleep so that `request`
    /// interrupts the wait immediately.
    pub fn wait_timeout(&self, period: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        let mut guard = self.inner.lock.lock();
        if self.is_requested() {
            return true;
        }
        self.inner.wake.wait_for(&mut guard, period);
        self.is_requested()
    }
}
