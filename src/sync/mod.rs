pub mod persistence;
pub mod reconcile;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

pub use persistence::{FlushOutcome, FlushReason, PersistenceScheduler};
pub use reconcile::{OfflineReconciler, ReconcileKind, RetryPolicy};

/// Ordering barrier shared by the engine components.
///
/// While a reconcile is in progress nothing but the reconciler may touch
/// `ResourceState`: the clock skips, flushes are blocked, and claims are
/// parked here until the session releases them.
#[derive(Debug, Default)]
pub struct SessionGate {
    reconciling: AtomicBool,
    running: AtomicBool,
    deferred_claim: AtomicBool,
    running_since: Mutex<Option<Instant>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_reconcile(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.reconciling.store(true, Ordering::SeqCst);
    }

    pub fn end_reconcile(&self) {
        self.reconciling.store(false, Ordering::SeqCst);
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciling.load(Ordering::SeqCst)
    }

    /// Gameplay is permitted: reconciled and foregrounded.
    pub fn open(&self) {
        *self.running_since.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.running_since.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.is_reconciling()
    }

    /// Time since the gate last opened, if it is open.
    pub fn dwell(&self) -> Option<std::time::Duration> {
        self.running_since
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .map(|since| since.elapsed())
    }

    /// Parks a claim until reconciliation resolves. Repeated requests collapse.
    pub fn defer_claim(&self) {
        self.deferred_claim.store(true, Ordering::SeqCst);
    }

    pub fn take_deferred_claim(&self) -> bool {
        self.deferred_claim.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_closes_gate() {
        let gate = SessionGate::new();
        gate.open();
        assert!(gate.is_open());

        gate.begin_reconcile();
        assert!(!gate.is_open());
        assert!(gate.is_reconciling());

        gate.end_reconcile();
        assert!(!gate.is_open());
        gate.open();
        assert!(gate.is_open());
    }

    #[test]
    fn test_deferred_claims_collapse() {
        let gate = SessionGate::new();
        gate.defer_claim();
        gate.defer_claim();

        assert!(gate.take_deferred_claim());
        assert!(!gate.take_deferred_claim());
    }

    #[tokio::test]
    async fn test_dwell_only_while_open() {
        let gate = SessionGate::new();
        assert!(gate.dwell().is_none());
        gate.open();
        assert!(gate.dwell().is_some());
        gate.close();
        assert!(gate.dwell().is_none());
    }
}
