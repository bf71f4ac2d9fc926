//! Activation state shared with in-flight work

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Active flag plus an epoch counter.
///
/// Every deactivation bumps the epoch. Work started under one epoch may
/// only apply its result while the guard is still active in that epoch,
/// so a model call that returns after `stop()` is discarded. Clones share
/// state, which lets another task stop the strategy mid-call.
#[derive(Debug, Clone, Default)]
pub struct LifecycleGuard {
    active: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Still active and no stop since `epoch` was read
    pub fn is_current(&self, epoch: u64) -> bool {
        self.is_active() && self.epoch() == epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deactivation_invalidates_epoch() {
        let guard = LifecycleGuard::new();
        guard.activate();
        let epoch = guard.epoch();
        assert!(guard.is_current(epoch));

        let remote = guard.clone();
        remote.deactivate();
        assert!(!guard.is_current(epoch));

        guard.activate();
        assert!(!guard.is_current(epoch));
        assert!(guard.is_current(guard.epoch()));
    }
}
