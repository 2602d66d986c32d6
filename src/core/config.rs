//! Runtime configuration loaded from `zion.toml`.
//!
//! Lookup order: `$ZION_CONFIG`, then `./zion.toml`, then built-in defaults.
//! `$ZION_STATE_DIR` overrides `paths.state_dir` after the file is read.

use crate::core::error::ZionError;
use crate::core::store::LeasePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "ZION_CONFIG";
pub const STATE_DIR_ENV: &str = "ZION_STATE_DIR";
pub const DEFAULT_CONFIG_FILE: &str = "zion.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZionConfig {
    pub paths: PathsConfig,
    pub sync: SyncConfig,
    pub reputation: ReputationPolicy,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
    pub inbox: Option<PathBuf>,
    pub world: Option<PathBuf>,
    pub reputation: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            state_dir: PathBuf::from("state"),
            inbox: None,
            world: None,
            reputation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Skip messages that fail the wire schema instead of folding them.
    pub require_valid: bool,
    /// Move consumed files to `<inbox>/_processed/` instead of deleting them.
    pub archive_processed: bool,
    /// Only consume files with this extension (no filter when unset).
    pub extension: Option<String>,
    pub lock_wait_ms: u64,
    pub stale_lock_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            require_valid: false,
            archive_processed: false,
            extension: None,
            lock_wait_ms: 2000,
            stale_lock_secs: 300,
        }
    }
}

impl SyncConfig {
    pub fn lease_policy(&self) -> LeasePolicy {
        LeasePolicy {
            wait: Duration::from_millis(self.lock_wait_ms),
            stale_after: Duration::from_secs(self.stale_lock_secs),
        }
    }
}

/// Ledger bounds and rates. Defaults mirror the reputation module constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationPolicy {
    pub min_score: f64,
    pub max_score: f64,
    pub neutral_score: f64,
    /// Fraction of the distance to neutral removed per day.
    pub decay_rate: f64,
    pub min_decay_interval_secs: i64,
    pub max_adjustments_per_day: u32,
    pub max_single_adjustment: f64,
    pub max_history_entries: usize,
    pub daily_counter_retention_days: i64,
}

impl Default for ReputationPolicy {
    fn default() -> Self {
        use crate::plugins::reputation as rep;
        ReputationPolicy {
            min_score: rep::MIN_SCORE,
            max_score: rep::MAX_SCORE,
            neutral_score: rep::NEUTRAL_SCORE,
            decay_rate: rep::DECAY_RATE,
            min_decay_interval_secs: rep::MIN_DECAY_INTERVAL_SECS,
            max_adjustments_per_day: rep::MAX_ADJUSTMENTS_PER_DAY,
            max_single_adjustment: rep::MAX_SINGLE_ADJUSTMENT,
            max_history_entries: rep::MAX_HISTORY_ENTRIES,
            daily_counter_retention_days: rep::DAILY_COUNTER_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl ZionConfig {
    /// Resolve the config from the environment and working directory.
    pub fn load() -> Result<ZionConfig, ZionError> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(local)?
                } else {
                    ZionConfig::default()
                }
            }
        };
        if let Some(dir) = std::env::var_os(STATE_DIR_ENV) {
            config.paths.state_dir = PathBuf::from(dir);
        }
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<ZionConfig, ZionError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ZionError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| ZionError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<ZionConfig, ZionError> {
        let config: ZionConfig =
            toml::from_str(content).map_err(|e| ZionError::ConfigError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ZionError> {
        let rep = &self.reputation;
        if !(rep.min_score <= rep.neutral_score && rep.neutral_score <= rep.max_score) {
            return Err(ZionError::ConfigError(format!(
                "reputation bounds must satisfy min <= neutral <= max (got {}, {}, {})",
                rep.min_score, rep.neutral_score, rep.max_score
            )));
        }
        if !(0.0..1.0).contains(&rep.decay_rate) {
            return Err(ZionError::ConfigError(format!(
                "reputation.decay_rate must be in [0, 1) (got {})",
                rep.decay_rate
            )));
        }
        if rep.max_history_entries == 0 {
            return Err(ZionError::ConfigError(
                "reputation.max_history_entries must be positive".into(),
            ));
        }
        Ok(())
    }
}
