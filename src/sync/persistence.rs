use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SessionGate;
use crate::state::StateManager;
use crate::store::{AuthoritativeStore, SaveProgressRequest};
use crate::task::BackgroundTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Interval,
    Background,
    Teardown,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Saved(SaveProgressRequest),
    /// Same payload as the last successful save.
    Unchanged,
    /// Another flush was in flight; its successor will pick up newer state.
    Coalesced,
    /// Reconciling or unauthenticated: local state is not safe to publish.
    Blocked,
    /// Logged and left for the next trigger.
    Failed,
}

/// Pushes `(energy, score)` to the store on a cadence and on lifecycle edges.
pub struct PersistenceScheduler {
    state: StateManager,
    store: Arc<dyn AuthoritativeStore>,
    gate: Arc<SessionGate>,
    interval: Duration,
    in_flight: tokio::sync::Mutex<()>,
    last_saved: Mutex<Option<SaveProgressRequest>>,
}

impl PersistenceScheduler {
    pub fn new(
        state: StateManager,
        store: Arc<dyn AuthoritativeStore>,
        gate: Arc<SessionGate>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            store,
            gate,
            interval,
            in_flight: tokio::sync::Mutex::new(()),
            last_saved: Mutex::new(None),
        }
    }

    /// Single-flight flush. A request made while another is in flight is
    /// dropped, not queued.
    pub async fn flush(&self, reason: FlushReason) -> FlushOutcome {
        let Ok(_permit) = self.in_flight.try_lock() else {
            debug!("Flush ({:?}) coalesced into in-flight save", reason);
            return FlushOutcome::Coalesced;
        };
        self.dispatch(reason, true).await
    }

    /// Waits out any in-flight save, then always attempts one more.
    pub async fn final_flush(&self) -> FlushOutcome {
        let _permit = self.in_flight.lock().await;
        self.dispatch(FlushReason::Teardown, false).await
    }

    async fn dispatch(&self, reason: FlushReason, skip_unchanged: bool) -> FlushOutcome {
        if self.gate.is_reconciling() || !self.store.is_authenticated() {
            debug!("Flush ({:?}) blocked: state not reconciled or no identity", reason);
            return FlushOutcome::Blocked;
        }

        let snapshot = self.state.get_snapshot().await;
        let payload = SaveProgressRequest {
            energy: snapshot.energy,
            score: snapshot.score,
        };

        if skip_unchanged && self.last_saved().as_ref() == Some(&payload) {
            debug!("Flush ({:?}) skipped: nothing changed since last save", reason);
            return FlushOutcome::Unchanged;
        }

        match self.store.save_game_progress(payload.clone()).await {
            Ok(()) => {
                debug!(
                    "💾 Saved progress ({:?}): energy={:.1}, score={}",
                    reason, payload.energy, payload.score
                );
                *self.last_saved.lock().unwrap_or_else(|p| p.into_inner()) = Some(payload.clone());
                FlushOutcome::Saved(payload)
            }
            Err(e) => {
                warn!("❌ Save failed ({:?}): {}. Will retry on next trigger", reason, e);
                FlushOutcome::Failed
            }
        }
    }

    fn last_saved(&self) -> Option<SaveProgressRequest> {
        self.last_saved.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Starts the periodic flush loop. The first flush happens one full
    /// interval after start.
    pub fn start(self: &Arc<Self>) -> BackgroundTask {
        let scheduler = self.clone();
        BackgroundTask::spawn("persistence", move |shutdown| scheduler.run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("💾 Persistence scheduler started (every {:?})", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    self.flush(FlushReason::Interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::time::ManualClock;
    use crate::types::ResourceState;
    use chrono::Utc;

    fn scheduler(latency: Duration) -> (Arc<MemoryStore>, StateManager, Arc<SessionGate>, Arc<PersistenceScheduler>) {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(MemoryStore::new(Arc::new(clock), 1000, 5).with_latency(latency));
        let state = StateManager::new(ResourceState::new(1000, 5));
        let gate = Arc::new(SessionGate::new());
        let scheduler = Arc::new(PersistenceScheduler::new(
            state.clone(),
            store.clone(),
            gate.clone(),
            Duration::from_secs(5),
        ));
        (store, state, gate, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_flushes_coalesce() {
        let (store, state, _gate, scheduler) = scheduler(Duration::from_millis(200));
        state.update(|s| s.set_energy(10.0)).await;

        let (a, b) = tokio::join!(
            scheduler.flush(FlushReason::Interval),
            scheduler.flush(FlushReason::Background)
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|o| matches!(o, FlushOutcome::Saved(_))).count(), 1);
        assert!(outcomes.contains(&FlushOutcome::Coalesced));
        assert_eq!(store.max_concurrent_saves(), 1);
        assert_eq!(store.calls("save_game_progress"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_carries_state_at_dispatch() {
        let (store, state, _gate, scheduler) = scheduler(Duration::from_millis(200));
        state.update(|s| s.set_energy(10.0)).await;

        let in_flight = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.flush(FlushReason::Interval).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        state.update(|s| s.set_energy(20.0)).await;

        assert_eq!(
            in_flight.await.unwrap(),
            FlushOutcome::Saved(SaveProgressRequest { energy: 10.0, score: 0 })
        );
        assert_eq!(
            scheduler.flush(FlushReason::Interval).await,
            FlushOutcome::Saved(SaveProgressRequest { energy: 20.0, score: 0 })
        );
        assert_eq!(store.saves().len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_state_is_not_rewritten() {
        let (store, state, _gate, scheduler) = scheduler(Duration::ZERO);
        state.update(|s| s.score = 7).await;

        assert!(matches!(scheduler.flush(FlushReason::Interval).await, FlushOutcome::Saved(_)));
        assert_eq!(scheduler.flush(FlushReason::Interval).await, FlushOutcome::Unchanged);
        assert!(matches!(scheduler.final_flush().await, FlushOutcome::Saved(_)));
        assert_eq!(store.calls("save_game_progress"), 2);
    }

    #[tokio::test]
    async fn test_failed_flush_retries_next_time() {
        let (store, state, _gate, scheduler) = scheduler(Duration::ZERO);
        store.fail_next("save_game_progress", 1);
        state.update(|s| s.score = 3).await;

        assert_eq!(scheduler.flush(FlushReason::Interval).await, FlushOutcome::Failed);
        assert!(matches!(scheduler.flush(FlushReason::Interval).await, FlushOutcome::Saved(_)));
        assert_eq!(store.ledger().score, 3);
    }

    #[tokio::test]
    async fn test_blocked_while_reconciling() {
        let (store, _state, gate, scheduler) = scheduler(Duration::ZERO);
        gate.begin_reconcile();

        assert_eq!(scheduler.flush(FlushReason::Background).await, FlushOutcome::Blocked);
        assert_eq!(scheduler.final_flush().await, FlushOutcome::Blocked);
        assert_eq!(store.calls("save_game_progress"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_loop_flushes_until_stopped() {
        let (store, state, _gate, scheduler) = scheduler(Duration::ZERO);
        let task = scheduler.start();

        for score in 1..=3u64 {
            state.update(|s| s.score = score).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        task.stop().await;
        let saved = store.calls("save_game_progress");
        assert!(saved >= 2);

        state.update(|s| s.score = 99).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.calls("save_game_progress"), saved);
    }
}
