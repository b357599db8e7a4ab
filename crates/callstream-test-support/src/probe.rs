//! Instrument for asserting concurrency bounds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts how many units are inside a region at once.
#[derive(Clone, Default)]
pub struct InFlightProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Default)]
struct ProbeInner {
    current: AtomicUsize,
    max_observed: AtomicUsize,
    total: AtomicUsize,
}

impl InFlightProbe {
    /// Fresh probe with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one unit as in flight until the guard is dropped.
    #[must_use = "the unit leaves the region when the guard is dropped"]
    pub fn enter(&self) -> ProbeGuard {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_observed.fetch_max(now, Ordering::SeqCst);
        self.inner.total.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Highest simultaneous count seen so far.
    #[must_use]
    pub fn max_observed(&self) -> usize {
        self.inner.max_observed.load(Ordering::SeqCst)
    }

    /// Units currently inside the region.
    #[must_use]
    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::SeqCst)
    }

    /// Units that have ever entered.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }
}

/// Leaves the probed region on drop.
pub struct ProbeGuard {
    inner: Arc<ProbeInner>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}
