//! Session orchestration: wires the engine components together and drives
//! them from the host's foreground/background/teardown signals.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::mining::{ClaimCoordinator, ClaimOutcome, EnergyClock, GrantOutcome, MultiplierManager};
use crate::state::StateManager;
use crate::store::{AuthoritativeStore, BotGrant, OverclockGrant};
use crate::sync::{FlushReason, OfflineReconciler, PersistenceScheduler, ReconcileKind, SessionGate};
use crate::task::BackgroundTask;
use crate::time::Clock;
use crate::types::{EngineEvent, ResourceSnapshot, ResourceState, SessionPhase};

/// Signals the host platform delivers to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Foreground,
    Background,
    Teardown,
}

/// Cloneable entry point for player actions and observation.
#[derive(Clone)]
pub struct SessionHandle {
    state_manager: StateManager,
    claims: Arc<ClaimCoordinator>,
    multipliers: Arc<MultiplierManager>,
}

impl SessionHandle {
    pub async fn claim(&self) -> ClaimOutcome {
        self.claims.claim().await
    }

    pub async fn request_overclock(&self) -> GrantOutcome<OverclockGrant> {
        self.multipliers.request_overclock().await
    }

    pub async fn request_bot(&self, duration_secs: u64) -> GrantOutcome<BotGrant> {
        self.multipliers.request_bot(duration_secs).await
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        self.state_manager.projection()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceSnapshot> {
        self.state_manager.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.state_manager.subscribe_events()
    }
}

pub struct MiningSession {
    state_manager: StateManager,
    gate: Arc<SessionGate>,
    energy_clock: Arc<EnergyClock>,
    scheduler: Arc<PersistenceScheduler>,
    reconciler: OfflineReconciler,
    claims: Arc<ClaimCoordinator>,
    multipliers: Arc<MultiplierManager>,
    tasks: Vec<BackgroundTask>,
    seeded: bool,
}

enum ReconcileStep {
    Done(Result<(), EngineError>),
    Interrupted(Option<LifecycleEvent>),
}

impl MiningSession {
    pub fn new(config: &Config, store: Arc<dyn AuthoritativeStore>, clock: Arc<dyn Clock>) -> Self {
        let state_manager = StateManager::new(ResourceState::from_tiers(config.tiers));
        let gate = Arc::new(SessionGate::new());

        let energy_clock = Arc::new(EnergyClock::new(state_manager.clone(), gate.clone()));
        let scheduler = Arc::new(PersistenceScheduler::new(
            state_manager.clone(),
            store.clone(),
            gate.clone(),
            config.flush_interval(),
        ));
        let reconciler = OfflineReconciler::new(
            state_manager.clone(),
            store.clone(),
            clock.clone(),
            gate.clone(),
            config.engine.offline_notice_threshold,
            config.retry_policy(),
        );
        let claims = Arc::new(ClaimCoordinator::new(
            state_manager.clone(),
            store.clone(),
            gate.clone(),
            config.min_dwell(),
        ));
        let multipliers = Arc::new(MultiplierManager::new(
            state_manager.clone(),
            store,
            clock,
            gate.clone(),
            config.engine.overclock_duration_secs,
        ));

        Self {
            state_manager,
            gate,
            energy_clock,
            scheduler,
            reconciler,
            claims,
            multipliers,
            tasks: Vec::new(),
            seeded: false,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            state_manager: self.state_manager.clone(),
            claims: self.claims.clone(),
            multipliers: self.multipliers.clone(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state_manager.phase()
    }

    /// Cold start: seed state from the store, then start mining.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        self.reconcile_and_run(ReconcileKind::ColdStart).await
    }

    /// Return from background: reconcile offline time, then resume mining.
    pub async fn foreground(&mut self) -> Result<(), EngineError> {
        match self.phase() {
            SessionPhase::Running => Ok(()),
            SessionPhase::Stopped => Err(EngineError::Stopped),
            _ => self.reconcile_and_run(self.next_reconcile()).await,
        }
    }

    pub async fn background(&mut self) {
        if matches!(
            self.phase(),
            SessionPhase::Idle | SessionPhase::Stopped | SessionPhase::Suspended
        ) {
            return;
        }

        info!("🌙 Session backgrounded");
        self.suspend().await;
    }

    /// Flush is refused by the gate if the last reconcile never finished.
    async fn suspend(&mut self) {
        self.stop_tasks().await;
        self.gate.close();
        self.state_manager.set_phase(SessionPhase::Suspended);
        self.scheduler.flush(FlushReason::Background).await;
    }

    /// Stops all timers, then makes one last best-effort save.
    pub async fn teardown(&mut self) {
        if self.phase() == SessionPhase::Stopped {
            return;
        }

        info!("🛑 Session tearing down");
        self.stop_tasks().await;
        self.gate.close();
        self.claims.settle().await;
        if self.seeded {
            let outcome = self.scheduler.final_flush().await;
            info!("Final flush: {:?}", outcome);
        } else {
            warn!("Skipping final flush: state was never seeded from the store");
        }
        self.state_manager.set_phase(SessionPhase::Stopped);
    }

    /// Drives the session from lifecycle signals until teardown.
    ///
    /// Reconciliation runs concurrently with the signal stream, so a
    /// teardown or background signal can abandon a reconcile that is stuck
    /// retrying.
    pub async fn run(mut self, mut lifecycle: mpsc::Receiver<LifecycleEvent>) -> Result<(), EngineError> {
        let mut pending = Some(ReconcileKind::ColdStart);

        loop {
            if let Some(kind) = pending.take() {
                let step = {
                    let reconcile = self.reconcile_and_run(kind);
                    tokio::pin!(reconcile);
                    loop {
                        tokio::select! {
                            result = &mut reconcile => break ReconcileStep::Done(result),
                            event = lifecycle.recv() => match event {
                                Some(LifecycleEvent::Foreground) => continue,
                                other => break ReconcileStep::Interrupted(other),
                            },
                        }
                    }
                };

                match step {
                    ReconcileStep::Done(Ok(())) => {}
                    ReconcileStep::Done(Err(e)) => {
                        error!("❌ Session cannot start: {}", e);
                        self.teardown().await;
                        return Err(e);
                    }
                    ReconcileStep::Interrupted(Some(LifecycleEvent::Background)) => {
                        warn!("Backgrounded before the session finished resuming");
                        self.suspend().await;
                        continue;
                    }
                    ReconcileStep::Interrupted(_) => {
                        self.teardown().await;
                        return Ok(());
                    }
                }
            }

            match lifecycle.recv().await {
                Some(LifecycleEvent::Background) => self.background().await,
                Some(LifecycleEvent::Foreground) => {
                    if self.phase() != SessionPhase::Running {
                        pending = Some(self.next_reconcile());
                    }
                }
                Some(LifecycleEvent::Teardown) | None => {
                    self.teardown().await;
                    return Ok(());
                }
            }
        }
    }

    fn next_reconcile(&self) -> ReconcileKind {
        if self.seeded {
            ReconcileKind::Resume
        } else {
            ReconcileKind::ColdStart
        }
    }

    async fn reconcile_and_run(&mut self, kind: ReconcileKind) -> Result<(), EngineError> {
        if self.phase() == SessionPhase::Stopped {
            return Err(EngineError::Stopped);
        }

        // A confirmation landing after the reconcile would clobber it.
        self.claims.settle().await;
        self.reconciler.reconcile_until_ready(kind).await?;
        self.seeded = true;

        self.gate.open();
        self.state_manager.set_phase(SessionPhase::Running);
        self.tasks.push(self.energy_clock.start());
        self.tasks.push(self.scheduler.start());
        info!("🚀 Session running");

        if let Some(outcome) = self.claims.release_deferred().await {
            info!("Deferred claim released: {:?}", outcome);
        }
        Ok(())
    }

    async fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.stop().await;
        }
    }
}
