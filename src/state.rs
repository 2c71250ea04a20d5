use crate::types::*;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};

const EVENT_CAPACITY: usize = 64;

/// Sole owner of the session's `ResourceState`.
///
/// Every mutation goes through [`StateManager::update`], which holds the
/// write lock for one synchronous step and then republishes the read
/// projection. Presentation code only ever sees `ResourceSnapshot`s.
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<ResourceState>>,
    projection: Arc<watch::Sender<ResourceSnapshot>>,
    events: broadcast::Sender<EngineEvent>,
}

impl StateManager {
    pub fn new(initial: ResourceState) -> Self {
        let (projection, _) = watch::channel(ResourceSnapshot::project(&initial, SessionPhase::Idle));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: Arc::new(RwLock::new(initial)),
            projection: Arc::new(projection),
            events,
        }
    }

    /// Applies one non-preemptible step to the state and republishes.
    pub async fn update<F, R>(&self, step: F) -> R
    where
        F: FnOnce(&mut ResourceState) -> R,
    {
        let mut state = self.state.write().await;
        let result = step(&mut state);
        // Phase is read under the projection's own lock so a concurrent
        // set_phase is never overwritten.
        self.projection
            .send_modify(|snapshot| *snapshot = ResourceSnapshot::project(&state, snapshot.phase));
        result
    }

    pub async fn get_snapshot(&self) -> ResourceState {
        self.state.read().await.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.projection.borrow().phase
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.projection.send_modify(|snapshot| snapshot.phase = phase);
    }

    /// Latest published projection, without touching the state lock.
    pub fn projection(&self) -> ResourceSnapshot {
        self.projection.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceSnapshot> {
        self.projection.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        // No subscribers is fine; notices are best effort.
        self.events.send(event).ok();
    }
}
