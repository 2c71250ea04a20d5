use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::StateManager;
use crate::store::AuthoritativeStore;
use crate::sync::SessionGate;
use crate::types::EngineEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Applied locally; confirmation is on its way.
    Submitted { amount: u64 },
    /// A claim is already outstanding. Energy keeps accruing for the next one.
    InFlight,
    /// Reconciliation is running; the claim runs once it resolves.
    Deferred,
    NothingToClaim,
    /// Issued too soon after gameplay (re)started.
    TooSoon,
    /// Session is not foregrounded.
    NotRunning,
}

/// Turns accrued energy into score, optimistically, one claim at a time.
pub struct ClaimCoordinator {
    state_manager: StateManager,
    store: Arc<dyn AuthoritativeStore>,
    gate: Arc<SessionGate>,
    min_dwell: Duration,
    in_flight: Arc<tokio::sync::Mutex<()>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ClaimCoordinator {
    pub fn new(
        state_manager: StateManager,
        store: Arc<dyn AuthoritativeStore>,
        gate: Arc<SessionGate>,
        min_dwell: Duration,
    ) -> Self {
        Self {
            state_manager,
            store,
            gate,
            min_dwell,
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
            pending: Mutex::new(None),
        }
    }

    pub async fn claim(&self) -> ClaimOutcome {
        self.submit(true).await
    }

    /// Runs a claim parked during reconciliation, if there is one. The
    /// player already waited out the reconcile, so dwell time is not checked.
    pub async fn release_deferred(&self) -> Option<ClaimOutcome> {
        if self.gate.take_deferred_claim() {
            Some(self.submit(false).await)
        } else {
            None
        }
    }

    async fn submit(&self, enforce_dwell: bool) -> ClaimOutcome {
        if self.gate.is_reconciling() {
            debug!("Claim deferred until reconciliation resolves");
            self.gate.defer_claim();
            return ClaimOutcome::Deferred;
        }
        if !self.gate.is_open() {
            return ClaimOutcome::NotRunning;
        }
        if let Some(dwell) = self.gate.dwell().filter(|_| enforce_dwell) {
            if dwell < self.min_dwell {
                debug!("Claim refused: only {:?} since session start", dwell);
                return ClaimOutcome::TooSoon;
            }
        }

        let Ok(permit) = self.in_flight.clone().try_lock_owned() else {
            debug!("Claim ignored: previous claim still in flight");
            return ClaimOutcome::InFlight;
        };

        let amount = self
            .state_manager
            .update(|s| {
                let amount = s.claimable();
                if amount >= 1 {
                    s.score += amount;
                    s.set_energy(s.energy - amount as f64);
                }
                amount
            })
            .await;

        if amount == 0 {
            return ClaimOutcome::NothingToClaim;
        }

        let state_manager = self.state_manager.clone();
        let store = self.store.clone();
        let gate = self.gate.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            Self::confirm(state_manager, store, gate, amount).await;
        });
        *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

        ClaimOutcome::Submitted { amount }
    }

    async fn confirm(
        state_manager: StateManager,
        store: Arc<dyn AuthoritativeStore>,
        gate: Arc<SessionGate>,
        amount: u64,
    ) {
        match store.claim_mining().await {
            Ok(response) if response.success => {
                if gate.is_reconciling() {
                    debug!("Claim confirmation arrived mid-reconcile; store baseline wins");
                    return;
                }
                let score = match response.new_score {
                    Some(new_score) => {
                        state_manager
                            .update(|s| {
                                if s.score != new_score {
                                    debug!("Claim divergence: local {} -> store {}", s.score, new_score);
                                }
                                s.score = new_score;
                            })
                            .await;
                        new_score
                    }
                    None => state_manager.get_snapshot().await.score,
                };
                info!("✅ Claimed {} (score {})", amount, score);
                state_manager.emit(EngineEvent::ClaimConfirmed { amount, score });
            }
            Ok(response) => {
                let message = response.message.unwrap_or_else(|| "Claim rejected".to_string());
                warn!("⚠️  Claim of {} rejected: {}", amount, message);
                state_manager.emit(EngineEvent::Notice { message });
            }
            Err(e) => {
                warn!("❌ Claim of {} not confirmed: {}. Next sync will reconcile", amount, e);
            }
        }
    }

    /// Waits for the outstanding confirmation, if any.
    pub async fn settle(&self) {
        let handle = self.pending.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Claim confirmation task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }
}
