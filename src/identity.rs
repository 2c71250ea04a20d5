use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Ed25519 key pair that authenticates store calls for one player.
#[derive(Clone)]
pub struct PlayerIdentity {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl PlayerIdentity {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ore-engine")
            .join("player.key")
    }

    /// Load or generate player identity
    pub fn load_or_generate(key_path: &Path) -> Result<Self> {
        if key_path.exists() {
            Self::load(key_path)
        } else {
            info!("🔐 Generating new Ed25519 player identity...");
            let identity = Self::generate();
            identity.save(key_path)?;
            info!("✅ Player identity saved to {:?}", key_path);
            Ok(identity)
        }
    }

    /// Fresh Ed25519 key pair from the thread RNG
    pub fn generate() -> Self {
        let signing_key = SigningKey::from_bytes(&rand::random());
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Read a raw 32-byte secret key
    fn load(path: &Path) -> Result<Self> {
        let key_bytes = fs::read(path).context("Failed to read player key file")?;

        let key_array: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid key file: expected 32 bytes, got {}", key_bytes.len()))?;

        let signing_key = SigningKey::from_bytes(&key_array);
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Persist the secret key, readable by the owner only
    fn save(&self, path: &Path) -> Result<()> {
        // Ensure key directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create key directory")?;
        }

        fs::write(path, self.signing_key.to_bytes()).context("Failed to write player key")?;

        // Restrict to owner (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600); // owner rw
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Public half, as registered with the store
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Signature bytes as base64, ready for the x-signature header
    pub fn sign_base64(&self, message: &[u8]) -> String {
        STANDARD.encode(self.sign(message).to_bytes())
    }
}
