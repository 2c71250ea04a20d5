// ore-engine/src/store/http.rs
// Signed JSON-over-HTTP binding of the authoritative store

use async_trait::async_trait;
use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

use super::*;
use crate::error::{StoreError, StoreResult};
use crate::identity::PlayerIdentity;

pub struct HttpStore {
    client: Client,
    api_base: String,
    player_id: String,
    identity: Option<PlayerIdentity>,
}

/// Headers and body of one signed RPC call.
#[derive(Debug)]
pub struct SignedCall {
    pub path: String,
    pub body: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl SignedCall {
    pub fn create_and_sign(operation: &str, body: String, identity: &PlayerIdentity) -> Self {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = uuid::Uuid::new_v4().to_string();
        let path = format!("/rpc/{}", operation);

        let mut call = Self {
            path,
            body,
            timestamp,
            nonce,
            signature: String::new(),
        };
        call.signature = identity.sign_base64(call.canonical_message().as_bytes());
        call
    }

    /// Format: METHOD|PATH|SHA256(BODY)|timestamp|nonce
    pub fn canonical_message(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.body.as_bytes()));
        format!("POST|{}|{}|{}|{}", self.path, digest, self.timestamp, self.nonce)
    }
}

impl HttpStore {
    pub fn new(
        api_base: String,
        player_id: String,
        identity: Option<PlayerIdentity>,
        request_timeout: Duration,
    ) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            player_id,
            identity,
        })
    }

    async fn call<B, R>(&self, operation: &str, body: &B) -> StoreResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let identity = self.identity.as_ref().ok_or(StoreError::NotAuthenticated)?;
        let body = serde_json::to_string(body)?;
        let call = SignedCall::create_and_sign(operation, body, identity);
        let url = format!("{}{}", self.api_base, call.path);

        debug!("→ {} ({} bytes)", operation, call.body.len());

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-player-id", &self.player_id)
            .header("x-signature", &call.signature)
            .header("x-timestamp", call.timestamp.to_string())
            .header("x-nonce", &call.nonce)
            .body(call.body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!("{} failed with status {}", operation, status);
            return Err(StoreError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        // Empty bodies are valid for fire-and-forget calls.
        let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[async_trait]
impl AuthoritativeStore for HttpStore {
    fn is_authenticated(&self) -> bool {
        self.identity.is_some() && !self.player_id.is_empty()
    }

    async fn sync_energy_on_load(&self, request: LoadSyncRequest) -> StoreResult<LoadSyncResponse> {
        self.call("sync_energy_on_load", &request).await
    }

    async fn sync_offline(&self) -> StoreResult<OfflineSyncResponse> {
        self.call("sync_offline", &serde_json::json!({})).await
    }

    async fn claim_mining(&self) -> StoreResult<ClaimResponse> {
        self.call("claim_mining", &serde_json::json!({})).await
    }

    async fn save_game_progress(&self, request: SaveProgressRequest) -> StoreResult<()> {
        let _: IgnoredAny = self.call("save_game_progress", &request).await?;
        Ok(())
    }

    async fn activate_bot(&self, request: BotRequest) -> StoreResult<BotResponse> {
        self.call("activate_bot", &request).await
    }

    async fn watch_overclock_ad(&self) -> StoreResult<OverclockAdResponse> {
        self.call("watch_overclock_ad", &serde_json::json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use ed25519_dalek::{Signature, Verifier};

    #[test]
    fn test_canonical_message_format() {
        let call = SignedCall {
            path: "/rpc/save_game_progress".to_string(),
            body: "{}".to_string(),
            timestamp: 1738576800,
            nonce: "nonce-123".to_string(),
            signature: String::new(),
        };

        let canonical = call.canonical_message();
        assert!(canonical.starts_with("POST|/rpc/save_game_progress|"));
        assert!(canonical.ends_with("|1738576800|nonce-123"));
        // sha256("{}")
        assert!(canonical.contains("44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"));
    }

    #[test]
    fn test_signature_verifies_against_canonical_message() {
        let identity = PlayerIdentity::generate();
        let call = SignedCall::create_and_sign(
            "claim_mining",
            r#"{"energy":12.0,"score":40}"#.to_string(),
            &identity,
        );

        let raw = STANDARD.decode(&call.signature).unwrap();
        let signature = Signature::from_slice(&raw).unwrap();
        assert!(identity
            .verifying_key
            .verify(call.canonical_message().as_bytes(), &signature)
            .is_ok());
    }

    #[tokio::test]
    async fn test_calls_without_identity_fail_fast() {
        let store = HttpStore::new(
            "http://127.0.0.1:9".to_string(),
            "player-1".to_string(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(!store.is_authenticated());
        assert!(matches!(store.claim_mining().await, Err(StoreError::NotAuthenticated)));
    }
}
