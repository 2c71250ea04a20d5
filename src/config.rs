use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::RetryPolicy;
use crate::types::{Tiers, LIMIT_TIERS, SPEED_TIERS};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Config {
    pub store: StoreConfig,
    pub engine: EngineConfig,
    // Cached tier selection; not a source of truth
    pub tiers: Tiers,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StoreConfig {
    pub api_url: String,
    pub player_id: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    pub flush_interval_secs: u64,
    /// Offline earnings at or below this are applied silently.
    pub offline_notice_threshold: u64,
    pub overclock_duration_secs: u64,
    pub min_dwell_secs: u64,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReconcileConfig {
    /// 0 = retry until the session is torn down.
    pub max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                api_url: "https://api.ore-engine.dev".to_string(),
                player_id: String::new(),
                request_timeout_secs: 10,
            },
            engine: EngineConfig {
                flush_interval_secs: 5,
                offline_notice_threshold: 0,
                overclock_duration_secs: 300,
                min_dwell_secs: 0,
                reconcile: ReconcileConfig {
                    max_attempts: 0,
                    retry_initial_ms: 500,
                    retry_max_ms: 30_000,
                },
            },
            tiers: Tiers::default(),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if any), then `ORE_*` environment
    /// variables, e.g. `ORE_STORE__API_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path.is_some();
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default()).context("Failed to seed defaults")?)
            .add_source(
                config::File::from(path.clone())
                    .format(config::FileFormat::Toml)
                    .required(explicit),
            )
            .add_source(
                config::Environment::with_prefix("ORE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ore-engine")
            .join("config.toml")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let config_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, config_str).context("Failed to write config file")?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiers.limit >= LIMIT_TIERS.len() {
            anyhow::bail!("tiers.limit must be below {}, got {}", LIMIT_TIERS.len(), self.tiers.limit);
        }
        if self.tiers.speed >= SPEED_TIERS.len() {
            anyhow::bail!("tiers.speed must be below {}, got {}", SPEED_TIERS.len(), self.tiers.speed);
        }
        if self.engine.flush_interval_secs == 0 {
            anyhow::bail!("engine.flush_interval_secs must be positive");
        }
        if self.store.request_timeout_secs == 0 {
            anyhow::bail!("store.request_timeout_secs must be positive");
        }
        if self.engine.reconcile.retry_initial_ms > self.engine.reconcile.retry_max_ms {
            anyhow::bail!("engine.reconcile.retry_initial_ms exceeds retry_max_ms");
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.engine.flush_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.store.request_timeout_secs)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_secs(self.engine.min_dwell_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.engine.reconcile.max_attempts,
            initial_delay: Duration::from_millis(self.engine.reconcile.retry_initial_ms),
            max_delay: Duration::from_millis(self.engine.reconcile.retry_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_layers_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[store]
player_id = "miner-42"

[tiers]
limit = 3
speed = 5
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.store.player_id, "miner-42");
        assert_eq!(config.tiers, Tiers { limit: 3, speed: 5 });
        assert_eq!(config.engine.flush_interval_secs, 5);
        assert_eq!(config.store.api_url, Config::default().store.api_url);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.store.player_id = "p-1".to_string();
        config.tiers = Tiers { limit: 7, speed: 7 };
        config.save(&path).unwrap();

        assert_eq!(Config::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_rejects_out_of_range_tier() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[tiers]\nlimit = 8\nspeed = 0\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_retry_policy_mapping() {
        let policy = Config::default().retry_policy();
        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
