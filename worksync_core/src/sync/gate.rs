use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Single-flight gate for sync passes.
///
/// Constructed once by the composition root and cloned into every path that can
/// start a pass. Acquisition never waits: a busy gate means "skip this attempt".
#[derive(Debug, Clone)]
pub struct SyncGate {
    permits: Arc<Semaphore>,
}

/// Held for the duration of one pass. Dropping it releases the gate.
#[derive(Debug)]
pub struct SyncPermit {
    _permit: OwnedSemaphorePermit,
}

impl SyncPermit {
    pub fn release(self) {}
}

impl SyncGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn try_acquire(&self) -> Option<SyncPermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|p| SyncPermit { _permit: p })
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let gate = SyncGate::new();
        let other = gate.clone();

        let permit = gate.try_acquire().expect("first acquire");
        assert!(other.is_busy());
        assert!(other.try_acquire().is_none());

        permit.release();
        assert!(!gate.is_busy());
        assert!(other.try_acquire().is_some());
    }

    #[test]
    fn dropping_permit_releases() {
        let gate = SyncGate::new();
        {
            let _p = gate.try_acquire().unwrap();
            assert!(gate.try_acquire().is_none());
        }
        assert!(gate.try_acquire().is_some());
    }
}
