//! Single-flight busy flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set while a send (or an explicit conversation creation) is in flight.
#[derive(Clone, Debug, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    /// Create an idle flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag if it is clear. The returned guard clears it on drop.
    #[must_use]
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.0)))
    }

    /// Whether an operation is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Holds the busy flag set.
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_one_guard_at_a_time() {
        let flag = BusyFlag::new();
        let guard = flag.try_acquire().unwrap();
        assert!(flag.is_busy());
        assert!(flag.try_acquire().is_none());
        assert!(flag.clone().try_acquire().is_none());

        drop(guard);
        assert!(!flag.is_busy());
        assert!(flag.try_acquire().is_some());
    }
}
