//! Contract with the authoritative game store.
//!
//! The engine never computes offline accrual or grants effects on its own;
//! everything scarce comes back through one of these calls.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

pub use http::HttpStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Serialize)]
pub struct LoadSyncRequest {
    pub regen_rate: u64,
    pub capacity: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoadSyncResponse {
    pub score: u64,
    pub energy: f64,
    #[serde(default)]
    pub bot_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OfflineSyncResponse {
    pub success: bool,
    #[serde(default)]
    pub new_score: u64,
    #[serde(default)]
    pub new_energy: Option<f64>,
    #[serde(default)]
    pub mined_amount: u64,
    #[serde(default)]
    pub bot_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClaimResponse {
    pub success: bool,
    #[serde(default)]
    pub new_score: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SaveProgressRequest {
    pub energy: f64,
    pub score: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotRequest {
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BotResponse {
    #[serde(default)]
    pub bot_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OverclockAdResponse {
    pub success: bool,
    #[serde(default)]
    pub new_count: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Proof that the store granted an overclock window.
///
/// Only constructible inside the crate from a successful
/// `watch_overclock_ad` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverclockGrant {
    duration_secs: u64,
    uses_today: u32,
}

impl OverclockGrant {
    pub(crate) fn confirmed(duration_secs: u64, uses_today: u32) -> Self {
        Self { duration_secs, uses_today }
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn uses_today(&self) -> u32 {
        self.uses_today
    }
}

/// Proof that the store started a bot contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotGrant {
    duration_secs: u64,
    from_expiry: bool,
}

impl BotGrant {
    /// The store confirmed the contract but did not say when it ends.
    pub(crate) fn confirmed(duration_secs: u64) -> Self {
        Self {
            duration_secs,
            from_expiry: false,
        }
    }

    /// Remaining time derived from the store's reported expiry.
    pub(crate) fn until_expiry(remaining_secs: u64) -> Self {
        Self {
            duration_secs: remaining_secs,
            from_expiry: true,
        }
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Whether the countdown must be set to exactly this value.
    pub fn is_authoritative(&self) -> bool {
        self.from_expiry
    }
}

#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Whether a player identity is established for this store.
    fn is_authenticated(&self) -> bool;

    async fn sync_energy_on_load(&self, request: LoadSyncRequest) -> StoreResult<LoadSyncResponse>;

    async fn sync_offline(&self) -> StoreResult<OfflineSyncResponse>;

    /// Not retry-safe: callers must issue it at most once per logical claim.
    async fn claim_mining(&self) -> StoreResult<ClaimResponse>;

    async fn save_game_progress(&self, request: SaveProgressRequest) -> StoreResult<()>;

    async fn activate_bot(&self, request: BotRequest) -> StoreResult<BotResponse>;

    async fn watch_overclock_ad(&self) -> StoreResult<OverclockAdResponse>;
}

/// Seconds left until `expires_at`, floored at zero.
pub fn remaining_secs(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
    expires_at
        .map(|at| (at - now).num_seconds().max(0) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_remaining_secs() {
        let now = Utc::now();
        assert_eq!(remaining_secs(Some(now + Duration::seconds(300)), now), 300);
        assert_eq!(remaining_secs(Some(now - Duration::seconds(5)), now), 0);
        assert_eq!(remaining_secs(None, now), 0);
    }

    #[test]
    fn test_offline_response_tolerates_missing_fields() {
        let response: OfflineSyncResponse =
            serde_json::from_str(r#"{"success":true,"new_score":120,"mined_amount":20}"#).unwrap();
        assert_eq!(response.new_energy, None);
        assert_eq!(response.bot_expires_at, None);
        assert_eq!(response.new_score, 120);
    }

    #[test]
    fn test_overclock_rejection_decodes() {
        let response: OverclockAdResponse =
            serde_json::from_str(r#"{"success":false,"message":"Daily limit reached"}"#).unwrap();
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("Daily limit reached"));
    }
}
