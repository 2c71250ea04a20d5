use std::sync::Arc;
use tracing::{info, warn};

use crate::state::StateManager;
use crate::store::{remaining_secs, AuthoritativeStore, BotGrant, BotRequest, OverclockGrant};
use crate::sync::SessionGate;
use crate::time::Clock;
use crate::types::EngineEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome<G> {
    Granted(G),
    /// The store said no (daily cap and the like). Nothing changed locally.
    Rejected { message: String },
    /// Transport failure, or the session is not in a state to accept grants.
    Unavailable,
}

/// Tracks the overclock and bot countdowns.
///
/// Neither timer ever grows without a grant the store has confirmed; the
/// clock is the only thing that shrinks them.
pub struct MultiplierManager {
    state_manager: StateManager,
    store: Arc<dyn AuthoritativeStore>,
    clock: Arc<dyn Clock>,
    gate: Arc<SessionGate>,
    overclock_duration_secs: u64,
}

impl MultiplierManager {
    pub fn new(
        state_manager: StateManager,
        store: Arc<dyn AuthoritativeStore>,
        clock: Arc<dyn Clock>,
        gate: Arc<SessionGate>,
        overclock_duration_secs: u64,
    ) -> Self {
        Self {
            state_manager,
            store,
            clock,
            gate,
            overclock_duration_secs,
        }
    }

    /// Asks the store for an ad-gated overclock window.
    pub async fn request_overclock(&self) -> GrantOutcome<OverclockGrant> {
        if !self.gate.is_open() {
            return GrantOutcome::Unavailable;
        }

        match self.store.watch_overclock_ad().await {
            Ok(response) if response.success => {
                let grant = OverclockGrant::confirmed(
                    self.overclock_duration_secs,
                    response.new_count.unwrap_or(0),
                );
                self.activate_overclock(grant).await;
                GrantOutcome::Granted(grant)
            }
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Overclock unavailable".to_string());
                info!("Overclock refused: {}", message);
                self.state_manager.emit(EngineEvent::Notice {
                    message: message.clone(),
                });
                GrantOutcome::Rejected { message }
            }
            Err(e) => {
                warn!("❌ Overclock request failed: {}", e);
                GrantOutcome::Unavailable
            }
        }
    }

    /// Starts the countdown for a confirmed overclock. Grants do not stack.
    pub async fn activate_overclock(&self, grant: OverclockGrant) {
        let remaining = self
            .state_manager
            .update(|s| {
                s.overclock_remaining = s.overclock_remaining.max(grant.duration_secs());
                s.overclock_remaining
            })
            .await;

        info!("⚡ Overclock active for {}s ({} used today)", remaining, grant.uses_today());
        self.state_manager.emit(EngineEvent::OverclockGranted {
            duration_secs: grant.duration_secs(),
            uses_today: grant.uses_today(),
        });
    }

    /// Asks the store to start a bot contract of `duration_secs`.
    pub async fn request_bot(&self, duration_secs: u64) -> GrantOutcome<BotGrant> {
        if !self.gate.is_open() {
            return GrantOutcome::Unavailable;
        }

        match self.store.activate_bot(BotRequest { duration_seconds: duration_secs }).await {
            Ok(response) => {
                let grant = match response.bot_expires_at {
                    Some(_) => BotGrant::until_expiry(remaining_secs(response.bot_expires_at, self.clock.now())),
                    None => BotGrant::confirmed(duration_secs),
                };
                self.activate_bot(grant).await;
                GrantOutcome::Granted(grant)
            }
            Err(e) => {
                warn!("❌ Bot activation failed: {}", e);
                self.state_manager.emit(EngineEvent::Notice {
                    message: format!("Bot activation failed: {}", e),
                });
                GrantOutcome::Unavailable
            }
        }
    }

    /// Starts the bot countdown. A reported expiry replaces the local
    /// countdown outright; without one the grant does not stack.
    pub async fn activate_bot(&self, grant: BotGrant) {
        self.state_manager
            .update(|s| {
                s.bot_remaining = if grant.is_authoritative() {
                    grant.duration_secs()
                } else {
                    s.bot_remaining.max(grant.duration_secs())
                }
            })
            .await;

        info!("🤖 Bot mining for {}s", grant.duration_secs());
        self.state_manager.emit(EngineEvent::BotActivated {
            duration_secs: grant.duration_secs(),
        });
    }
}
