use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Capacity values selectable through the "limit" upgrade tier.
pub const LIMIT_TIERS: [u64; 8] = [1000, 2000, 3500, 5000, 7500, 10000, 15000, 25000];

/// Regen rates (energy per second) selectable through the "speed" upgrade tier.
pub const SPEED_TIERS: [u64; 8] = [1, 2, 3, 5, 8, 12, 18, 25];

/// Regen multiplier while an overclock window is active.
pub const OVERCLOCK_MULTIPLIER: u64 = 2;

/// Cached upgrade selection. Only used to seed the first reconcile;
/// the store stays the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tiers {
    pub limit: usize,
    pub speed: usize,
}

impl Default for Tiers {
    fn default() -> Self {
        Self { limit: 0, speed: 0 }
    }
}

impl Tiers {
    pub fn capacity(&self) -> Option<u64> {
        LIMIT_TIERS.get(self.limit).copied()
    }

    pub fn regen_rate(&self) -> Option<u64> {
        SPEED_TIERS.get(self.speed).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub score: u64,
    pub energy: f64,
    pub capacity: u64,
    pub regen_rate: u64,
    pub overclock_remaining: u64,
    pub bot_remaining: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ResourceState {
    pub fn new(capacity: u64, regen_rate: u64) -> Self {
        Self {
            score: 0,
            energy: 0.0,
            capacity: capacity.max(1),
            regen_rate: regen_rate.max(1),
            overclock_remaining: 0,
            bot_remaining: 0,
            last_synced_at: None,
        }
    }

    pub fn from_tiers(tiers: Tiers) -> Self {
        Self::new(
            tiers.capacity().unwrap_or(LIMIT_TIERS[0]),
            tiers.regen_rate().unwrap_or(SPEED_TIERS[0]),
        )
    }

    pub fn effective_rate(&self) -> u64 {
        if self.overclock_remaining > 0 {
            self.regen_rate * OVERCLOCK_MULTIPLIER
        } else {
            self.regen_rate
        }
    }

    /// One second of foreground mining. Returns the energy actually gained.
    pub fn advance_one_second(&mut self) -> f64 {
        let before = self.energy;
        self.set_energy(self.energy + self.effective_rate() as f64);
        self.overclock_remaining = self.overclock_remaining.saturating_sub(1);
        self.bot_remaining = self.bot_remaining.saturating_sub(1);
        self.energy - before
    }

    /// Writes energy, clamped into `[0, capacity]`.
    pub fn set_energy(&mut self, energy: f64) {
        let cap = self.capacity as f64;
        self.energy = if energy.is_nan() { 0.0 } else { energy.clamp(0.0, cap) };
    }

    /// Whole units of energy a claim would convert right now.
    pub fn claimable(&self) -> u64 {
        self.energy.floor() as u64
    }
}

/// Where the session currently is in its foreground/background cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Reconciling,
    Running,
    Suspended,
    Stopped,
}

/// Read-only projection handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub score: u64,
    pub energy: f64,
    pub capacity: u64,
    pub regen_rate: u64,
    pub effective_rate: u64,
    pub overclock_remaining: u64,
    pub bot_remaining: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub phase: SessionPhase,
}

impl ResourceSnapshot {
    pub fn project(state: &ResourceState, phase: SessionPhase) -> Self {
        Self {
            score: state.score,
            energy: state.energy,
            capacity: state.capacity,
            regen_rate: state.regen_rate,
            effective_rate: state.effective_rate(),
            overclock_remaining: state.overclock_remaining,
            bot_remaining: state.bot_remaining,
            last_synced_at: state.last_synced_at,
            phase,
        }
    }
}

/// One-shot notifications for the player.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    OfflineEarnings { amount: u64 },
    ReconcileFailed { attempt: u32, error: String },
    Reconciled { score: u64, energy: f64 },
    ClaimConfirmed { amount: u64, score: u64 },
    OverclockGranted { duration_secs: u64, uses_today: u32 },
    BotActivated { duration_secs: u64 },
    Notice { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_clamps_at_capacity() {
        let mut state = ResourceState::new(12, 5);
        for _ in 0..10 {
            state.advance_one_second();
            assert!(state.energy >= 0.0 && state.energy <= state.capacity as f64);
        }
        assert_eq!(state.energy, 12.0);
    }

    #[test]
    fn test_overclock_doubles_then_reverts() {
        let mut state = ResourceState::new(1000, 5);
        state.overclock_remaining = 10;

        for _ in 0..10 {
            state.advance_one_second();
        }
        assert_eq!(state.energy, 100.0);
        assert_eq!(state.overclock_remaining, 0);

        assert_eq!(state.advance_one_second(), 5.0);
        assert_eq!(state.energy, 105.0);
    }

    #[test]
    fn test_timers_saturate_at_zero() {
        let mut state = ResourceState::new(1000, 1);
        state.bot_remaining = 1;
        state.advance_one_second();
        state.advance_one_second();
        assert_eq!(state.bot_remaining, 0);
        assert_eq!(state.overclock_remaining, 0);
    }

    #[test]
    fn test_tier_lookup() {
        let tiers = Tiers { limit: 7, speed: 3 };
        assert_eq!(tiers.capacity(), Some(25000));
        assert_eq!(tiers.regen_rate(), Some(5));
        assert_eq!(Tiers { limit: 8, speed: 0 }.capacity(), None);
    }

    #[test]
    fn test_set_energy_rejects_out_of_range() {
        let mut state = ResourceState::new(100, 1);
        state.set_energy(-3.0);
        assert_eq!(state.energy, 0.0);
        state.set_energy(150.5);
        assert_eq!(state.energy, 100.0);
        state.set_energy(f64::NAN);
        assert_eq!(state.energy, 0.0);
    }
}
