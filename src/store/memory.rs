//! In-process stand-in for the authoritative store.
//!
//! Used by the test suite and by `ore-engine play --dry-run`. It keeps a
//! single player's ledger and computes offline accrual the way the live
//! store does: standard regen capped at capacity, and while a bot contract
//! is active the bot converts regen straight into score.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::*;
use crate::error::{StoreError, StoreResult};
use crate::time::Clock;

pub const DEFAULT_OVERCLOCK_DAILY_LIMIT: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    pub score: u64,
    pub energy: f64,
    pub capacity: u64,
    pub regen_rate: u64,
    pub checkpoint: DateTime<Utc>,
    pub bot_expires_at: Option<DateTime<Utc>>,
    overclock_day: Option<NaiveDate>,
    overclock_uses: u32,
}

impl Ledger {
    /// Brings the ledger up to `now`. Returns the total mined amount.
    fn accrue(&mut self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.checkpoint).num_seconds().max(0) as u64;
        let bot_secs = self
            .bot_expires_at
            .map(|at| (at - self.checkpoint).num_seconds().clamp(0, elapsed as i64) as u64)
            .unwrap_or(0);
        let regen_secs = elapsed - bot_secs;

        let bot_mined = self.regen_rate * bot_secs;
        self.score += bot_mined;

        let before = self.energy;
        self.energy = (self.energy + (self.regen_rate * regen_secs) as f64).min(self.capacity as f64);
        self.checkpoint = now;

        bot_mined + (self.energy - before).max(0.0).floor() as u64
    }
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    ledger: Mutex<Ledger>,
    authenticated: AtomicBool,
    latency: Duration,
    overclock_daily_limit: u32,
    calls: Mutex<HashMap<&'static str, u32>>,
    failures: Mutex<HashMap<&'static str, u32>>,
    saves: Mutex<Vec<SaveProgressRequest>>,
    saves_in_flight: AtomicU32,
    max_concurrent_saves: AtomicU32,
    scripted_offline: Mutex<Option<OfflineSyncResponse>>,
    claim_rejection: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>, capacity: u64, regen_rate: u64) -> Self {
        let checkpoint = clock.now();
        Self {
            clock,
            ledger: Mutex::new(Ledger {
                score: 0,
                energy: 0.0,
                capacity,
                regen_rate,
                checkpoint,
                bot_expires_at: None,
                overclock_day: None,
                overclock_uses: 0,
            }),
            authenticated: AtomicBool::new(true),
            latency: Duration::ZERO,
            overclock_daily_limit: DEFAULT_OVERCLOCK_DAILY_LIMIT,
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            saves: Mutex::new(Vec::new()),
            saves_in_flight: AtomicU32::new(0),
            max_concurrent_saves: AtomicU32::new(0),
            scripted_offline: Mutex::new(None),
            claim_rejection: Mutex::new(None),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_overclock_limit(mut self, limit: u32) -> Self {
        self.overclock_daily_limit = limit;
        self
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// The next `times` calls to `operation` fail with a network error.
    pub fn fail_next(&self, operation: &'static str, times: u32) {
        lock(&self.failures).insert(operation, times);
    }

    /// The next `sync_offline` answers with `response` instead of the ledger.
    pub fn script_offline(&self, response: OfflineSyncResponse) {
        *lock(&self.scripted_offline) = Some(response);
    }

    /// The next `claim_mining` answers `success: false` and leaves the ledger alone.
    pub fn reject_next_claim(&self, message: impl Into<String>) {
        *lock(&self.claim_rejection) = Some(message.into());
    }

    pub fn calls(&self, operation: &str) -> u32 {
        lock(&self.calls).get(operation).copied().unwrap_or(0)
    }

    pub fn saves(&self) -> Vec<SaveProgressRequest> {
        lock(&self.saves).clone()
    }

    pub fn max_concurrent_saves(&self) -> u32 {
        self.max_concurrent_saves.load(Ordering::SeqCst)
    }

    pub fn ledger(&self) -> Ledger {
        lock(&self.ledger).clone()
    }

    /// Overwrites the player's ledger, checkpointing at the current time.
    pub fn set_ledger(&self, score: u64, energy: f64) {
        let now = self.clock.now();
        let mut ledger = lock(&self.ledger);
        ledger.score = score;
        ledger.energy = energy;
        ledger.checkpoint = now;
    }

    /// Starts a bot contract directly on the ledger (no RPC recorded).
    pub fn set_bot_expiry(&self, expires_at: Option<DateTime<Utc>>) {
        lock(&self.ledger).bot_expires_at = expires_at;
    }

    async fn enter(&self, operation: &'static str) -> StoreResult<()> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;

        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(StoreError::NotAuthenticated);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut failures = lock(&self.failures);
        if let Some(remaining) = failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Network(format!("{} unreachable", operation)));
            }
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl AuthoritativeStore for MemoryStore {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn sync_energy_on_load(&self, request: LoadSyncRequest) -> StoreResult<LoadSyncResponse> {
        self.enter("sync_energy_on_load").await?;
        let now = self.clock.now();
        let mut ledger = lock(&self.ledger);
        ledger.accrue(now);
        ledger.capacity = request.capacity;
        ledger.regen_rate = request.regen_rate;
        ledger.energy = ledger.energy.min(request.capacity as f64);

        Ok(LoadSyncResponse {
            score: ledger.score,
            energy: ledger.energy,
            bot_expires_at: ledger.bot_expires_at,
        })
    }

    async fn sync_offline(&self) -> StoreResult<OfflineSyncResponse> {
        self.enter("sync_offline").await?;
        if let Some(response) = lock(&self.scripted_offline).take() {
            return Ok(response);
        }
        let now = self.clock.now();
        let mut ledger = lock(&self.ledger);
        let mined_amount = ledger.accrue(now);

        Ok(OfflineSyncResponse {
            success: true,
            new_score: ledger.score,
            new_energy: Some(ledger.energy),
            mined_amount,
            bot_expires_at: ledger.bot_expires_at,
            message: None,
        })
    }

    async fn claim_mining(&self) -> StoreResult<ClaimResponse> {
        self.enter("claim_mining").await?;
        let rejection = lock(&self.claim_rejection).take();
        if let Some(message) = rejection {
            return Ok(ClaimResponse {
                success: false,
                new_score: None,
                message: Some(message),
            });
        }
        let now = self.clock.now();
        let mut ledger = lock(&self.ledger);
        ledger.accrue(now);

        let amount = ledger.energy.floor();
        if amount < 1.0 {
            return Ok(ClaimResponse {
                success: false,
                new_score: Some(ledger.score),
                message: Some("Nothing to claim".to_string()),
            });
        }
        ledger.score += amount as u64;
        ledger.energy -= amount;

        Ok(ClaimResponse {
            success: true,
            new_score: Some(ledger.score),
            message: None,
        })
    }

    async fn save_game_progress(&self, request: SaveProgressRequest) -> StoreResult<()> {
        let concurrent = self.saves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_saves.fetch_max(concurrent, Ordering::SeqCst);

        let entered = self.enter("save_game_progress").await;
        self.saves_in_flight.fetch_sub(1, Ordering::SeqCst);
        entered?;

        let now = self.clock.now();
        let mut ledger = lock(&self.ledger);
        ledger.energy = request.energy.clamp(0.0, ledger.capacity as f64);
        ledger.score = request.score;
        ledger.checkpoint = now;
        lock(&self.saves).push(request);
        Ok(())
    }

    async fn activate_bot(&self, request: BotRequest) -> StoreResult<BotResponse> {
        self.enter("activate_bot").await?;
        let now = self.clock.now();
        let mut ledger = lock(&self.ledger);
        ledger.accrue(now);
        let expires_at = now + chrono::Duration::seconds(request.duration_seconds as i64);
        ledger.bot_expires_at = Some(expires_at);

        Ok(BotResponse {
            bot_expires_at: Some(expires_at),
        })
    }

    async fn watch_overclock_ad(&self) -> StoreResult<OverclockAdResponse> {
        self.enter("watch_overclock_ad").await?;
        let today = self.clock.now().date_naive();
        let mut ledger = lock(&self.ledger);

        if ledger.overclock_day != Some(today) {
            ledger.overclock_day = Some(today);
            ledger.overclock_uses = 0;
        }
        if ledger.overclock_uses >= self.overclock_daily_limit {
            return Ok(OverclockAdResponse {
                success: false,
                new_count: None,
                message: Some("Daily overclock limit reached".to_string()),
            });
        }
        ledger.overclock_uses += 1;

        Ok(OverclockAdResponse {
            success: true,
            new_count: Some(ledger.overclock_uses),
            message: None,
        })
    }
}
