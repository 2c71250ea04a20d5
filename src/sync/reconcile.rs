use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::SessionGate;
use crate::error::{EngineError, StoreError};
use crate::state::StateManager;
use crate::store::{remaining_secs, AuthoritativeStore, LoadSyncRequest};
use crate::time::Clock;
use crate::types::{EngineEvent, SessionPhase};

/// Which store call seeds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileKind {
    /// Fresh load: the store recomputes from the tier parameters we send.
    ColdStart,
    /// Returning from background: the store reports what was mined meanwhile.
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Zero retries until the future is dropped.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What the store told us on the last successful reconcile.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub kind: ReconcileKind,
    pub score: u64,
    pub energy: f64,
    pub bot_remaining: u64,
    pub mined_amount: Option<u64>,
}

pub struct OfflineReconciler {
    state: StateManager,
    store: Arc<dyn AuthoritativeStore>,
    clock: Arc<dyn Clock>,
    gate: Arc<SessionGate>,
    offline_notice_threshold: u64,
    retry: RetryPolicy,
}

impl OfflineReconciler {
    pub fn new(
        state: StateManager,
        store: Arc<dyn AuthoritativeStore>,
        clock: Arc<dyn Clock>,
        gate: Arc<SessionGate>,
        offline_notice_threshold: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            state,
            store,
            clock,
            gate,
            offline_notice_threshold,
            retry,
        }
    }

    /// Retries `reconcile` with backoff until it succeeds.
    ///
    /// The gate stays closed for the whole loop, so nothing else mutates
    /// state from a stale baseline. Dropping the future abandons the loop
    /// and leaves the gate closed.
    pub async fn reconcile_until_ready(&self, kind: ReconcileKind) -> Result<ReconcileReport, EngineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.reconcile(kind).await {
                Ok(report) => return Ok(report),
                Err(EngineError::NotAuthenticated) => return Err(EngineError::NotAuthenticated),
                Err(e) => {
                    self.state.emit(EngineEvent::ReconcileFailed {
                        attempt,
                        error: e.to_string(),
                    });

                    if self.retry.max_attempts != 0 && attempt >= self.retry.max_attempts {
                        error!("❌ Offline reconciliation gave up after {} attempts", attempt);
                        return Err(EngineError::ReconcileExhausted { attempts: attempt });
                    }

                    let delay = self.retry.delay(attempt);
                    warn!("⚠️  Reconcile attempt {} failed: {}. Retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One reconciliation attempt. On success local score and energy are
    /// replaced by the store's answer and the gate's reconcile flag drops.
    pub async fn reconcile(&self, kind: ReconcileKind) -> Result<ReconcileReport, EngineError> {
        if !self.store.is_authenticated() {
            warn!("Skipping reconcile: no player identity");
            return Err(EngineError::NotAuthenticated);
        }

        self.gate.begin_reconcile();
        self.state.set_phase(SessionPhase::Reconciling);

        let mut report = self.fetch(kind).await?;
        let now = self.clock.now();

        let applied = report.clone();
        // Report what was applied, not the raw answer.
        report.energy = self
            .state
            .update(move |s| {
                if s.score != applied.score || s.energy != applied.energy {
                    debug!(
                        "Divergence resolved: local ({}, {:.2}) -> store ({}, {:.2})",
                        s.score, s.energy, applied.score, applied.energy
                    );
                }
                s.score = applied.score;
                s.set_energy(applied.energy);
                s.bot_remaining = applied.bot_remaining;
                s.last_synced_at = Some(now);
                s.energy
            })
            .await;

        self.gate.end_reconcile();

        if let Some(amount) = report.mined_amount {
            if amount > self.offline_notice_threshold {
                info!("⛏️  Mined {} while away", amount);
                self.state.emit(EngineEvent::OfflineEarnings { amount });
            }
        }
        self.state.emit(EngineEvent::Reconciled {
            score: report.score,
            energy: report.energy,
        });

        info!(
            "✅ Reconciled ({:?}): score={}, energy={:.1}, bot={}s",
            kind, report.score, report.energy, report.bot_remaining
        );
        Ok(report)
    }

    async fn fetch(&self, kind: ReconcileKind) -> Result<ReconcileReport, EngineError> {
        match kind {
            ReconcileKind::ColdStart => {
                let local = self.state.get_snapshot().await;
                let response = self
                    .store
                    .sync_energy_on_load(LoadSyncRequest {
                        regen_rate: local.regen_rate,
                        capacity: local.capacity,
                    })
                    .await?;

                Ok(ReconcileReport {
                    kind,
                    score: response.score,
                    energy: response.energy,
                    bot_remaining: remaining_secs(response.bot_expires_at, self.clock.now()),
                    mined_amount: None,
                })
            }
            ReconcileKind::Resume => {
                let response = self.store.sync_offline().await?;
                if !response.success {
                    return Err(StoreError::Rejected {
                        message: response
                            .message
                            .unwrap_or_else(|| "offline sync unsuccessful".to_string()),
                    }
                    .into());
                }

                let energy = match response.new_energy {
                    Some(energy) => energy,
                    None => self.state.get_snapshot().await.energy,
                };

                Ok(ReconcileReport {
                    kind,
                    score: response.new_score,
                    energy,
                    bot_remaining: remaining_secs(response.bot_expires_at, self.clock.now()),
                    mined_amount: Some(response.mined_amount),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, OfflineSyncResponse};
    use crate::time::ManualClock;
    use crate::types::ResourceState;
    use chrono::Utc;

    struct Fixture {
        clock: ManualClock,
        store: Arc<MemoryStore>,
        state: StateManager,
        gate: Arc<SessionGate>,
        reconciler: OfflineReconciler,
    }

    fn fixture(retry: RetryPolicy) -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone()), 1000, 5));
        let state = StateManager::new(ResourceState::new(1000, 5));
        let gate = Arc::new(SessionGate::new());
        let reconciler = OfflineReconciler::new(
            state.clone(),
            store.clone(),
            Arc::new(clock.clone()),
            gate.clone(),
            1,
            retry,
        );
        Fixture {
            clock,
            store,
            state,
            gate,
            reconciler,
        }
    }

    #[tokio::test]
    async fn test_cold_start_overwrites_local_state() {
        let f = fixture(RetryPolicy::default());
        f.store.set_ledger(250, 40.0);
        f.state
            .update(|s| {
                s.score = 9999;
                s.set_energy(700.0);
            })
            .await;

        let report = f.reconciler.reconcile(ReconcileKind::ColdStart).await.unwrap();
        assert_eq!(report.score, 250);

        let local = f.state.get_snapshot().await;
        assert_eq!(local.score, 250);
        assert_eq!(local.energy, 40.0);
        assert!(local.last_synced_at.is_some());
        assert!(!f.gate.is_reconciling());
    }

    #[tokio::test]
    async fn test_offline_accrual_is_bounded() {
        let f = fixture(RetryPolicy::default());
        f.reconciler.reconcile(ReconcileKind::ColdStart).await.unwrap();

        for elapsed in [1i64, 30, 120, 199, 5000] {
            let before = f.state.get_snapshot().await.energy;
            f.clock.advance_secs(elapsed);
            let report = f.reconciler.reconcile(ReconcileKind::Resume).await.unwrap();

            assert!(report.energy - before <= (5 * elapsed) as f64);
            assert!(report.energy <= 1000.0);
        }
    }

    #[tokio::test]
    async fn test_resume_with_bot_reports_prorated_accrual() {
        let f = fixture(RetryPolicy::default());
        f.store.set_bot_expiry(Some(f.clock.now() + chrono::Duration::seconds(300)));
        f.reconciler.reconcile(ReconcileKind::ColdStart).await.unwrap();
        assert_eq!(f.state.get_snapshot().await.bot_remaining, 300);

        let mut events = f.state.subscribe_events();
        f.clock.advance_secs(600);
        let report = f.reconciler.reconcile(ReconcileKind::Resume).await.unwrap();

        // 300s of bot mining into score, 300s of regen into energy (capped).
        assert_eq!(report.score, 5 * 300);
        assert_eq!(report.energy, 1000.0);
        assert_eq!(report.bot_remaining, 0);
        assert_eq!(events.recv().await.unwrap(), EngineEvent::OfflineEarnings { amount: 2500 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_store_answers() {
        let f = fixture(RetryPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        });
        f.store.fail_next("sync_energy_on_load", 3);
        let mut events = f.state.subscribe_events();

        f.reconciler
            .reconcile_until_ready(ReconcileKind::ColdStart)
            .await
            .unwrap();

        assert_eq!(f.store.calls("sync_energy_on_load"), 4);
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::ReconcileFailed { attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_keep_gate_closed() {
        let f = fixture(RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        });
        f.store.fail_next("sync_energy_on_load", 5);

        let result = f.reconciler.reconcile_until_ready(ReconcileKind::ColdStart).await;
        assert!(matches!(result, Err(EngineError::ReconcileExhausted { attempts: 2 })));
        assert!(f.gate.is_reconciling());
        assert!(!f.gate.is_open());
    }

    fn offline_answer(success: bool, new_energy: Option<f64>, mined_amount: u64) -> OfflineSyncResponse {
        OfflineSyncResponse {
            success,
            new_score: 300,
            new_energy,
            mined_amount,
            bot_expires_at: None,
            message: (!success).then(|| "offline sync unavailable".to_string()),
        }
    }

    #[tokio::test]
    async fn test_energy_above_capacity_is_reported_clamped() {
        let f = fixture(RetryPolicy::default());
        f.store.script_offline(offline_answer(true, Some(1500.0), 0));
        let mut events = f.state.subscribe_events();

        let report = f.reconciler.reconcile(ReconcileKind::Resume).await.unwrap();
        assert_eq!(report.energy, 1000.0);
        assert_eq!(f.state.get_snapshot().await.energy, 1000.0);
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::Reconciled { score: 300, energy: 1000.0 }
        );
    }

    #[tokio::test]
    async fn test_missing_offline_energy_keeps_local_energy() {
        let f = fixture(RetryPolicy::default());
        f.state.update(|s| s.set_energy(42.5)).await;
        f.store.script_offline(offline_answer(true, None, 0));

        let report = f.reconciler.reconcile(ReconcileKind::Resume).await.unwrap();
        assert_eq!(report.energy, 42.5);
        let local = f.state.get_snapshot().await;
        assert_eq!(local.score, 300);
        assert_eq!(local.energy, 42.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsuccessful_offline_sync_counts_as_failed_attempt() {
        let f = fixture(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        });
        f.store.script_offline(offline_answer(false, Some(900.0), 500));
        let mut events = f.state.subscribe_events();

        f.reconciler
            .reconcile_until_ready(ReconcileKind::Resume)
            .await
            .unwrap();

        assert_eq!(f.store.calls("sync_offline"), 2);
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::ReconcileFailed { attempt: 1, .. }
        ));
        // The rejected answer was never applied.
        assert_eq!(f.state.get_snapshot().await.score, 0);
    }

    #[tokio::test]
    async fn test_offline_notice_only_above_threshold() {
        let f = fixture(RetryPolicy::default());
        f.store.script_offline(offline_answer(true, Some(1.0), 1));
        let mut events = f.state.subscribe_events();

        f.reconciler.reconcile(ReconcileKind::Resume).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), EngineEvent::Reconciled { .. }));

        f.store.script_offline(offline_answer(true, Some(2.0), 2));
        f.reconciler.reconcile(ReconcileKind::Resume).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), EngineEvent::OfflineEarnings { amount: 2 });
    }

    #[tokio::test]
    async fn test_requires_identity() {
        let f = fixture(RetryPolicy::default());
        f.store.set_authenticated(false);

        let result = f.reconciler.reconcile_until_ready(ReconcileKind::ColdStart).await;
        assert!(matches!(result, Err(EngineError::NotAuthenticated)));
        assert_eq!(f.store.calls("sync_energy_on_load"), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }
}
