use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, trace};

use crate::state::StateManager;
use crate::sync::SessionGate;
use crate::task::BackgroundTask;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Foreground energy regeneration, one step per second.
///
/// The clock never extrapolates elapsed time. While the session is in the
/// background its task is stopped outright; whatever accrued meanwhile is
/// the reconciler's business.
pub struct EnergyClock {
    state_manager: StateManager,
    gate: Arc<SessionGate>,
}

impl EnergyClock {
    pub fn new(state_manager: StateManager, gate: Arc<SessionGate>) -> Self {
        Self { state_manager, gate }
    }

    /// Advances state by one second. Returns the energy gained, or `None`
    /// when gameplay is not permitted (reconciling or not foregrounded).
    pub async fn tick(&self) -> Option<f64> {
        if !self.gate.is_open() {
            trace!("Tick skipped: gate closed");
            return None;
        }

        let (gained, energy, capacity) = self
            .state_manager
            .update(|s| {
                let gained = s.advance_one_second();
                (gained, s.energy, s.capacity)
            })
            .await;

        trace!("Mining tick: +{:.1} | {:.1} / {}", gained, energy, capacity);
        Some(gained)
    }

    pub fn start(self: &Arc<Self>) -> BackgroundTask {
        let clock = self.clone();
        BackgroundTask::spawn("energy-clock", move |shutdown| clock.run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        // First tick one full period out: no catch-up on resume.
        let mut ticker = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("⛏️  Energy clock started (tick every {:?})", TICK_PERIOD);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
