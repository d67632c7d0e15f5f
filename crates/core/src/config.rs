//! Configuration management for PcrBind.
//!
//! A [`Config`] is built once at startup (from a TOML file or defaults),
//! validated, and then handed by value or reference to each component. Nothing
//! reads configuration from process-wide mutable state.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
#[cfg(feature = "toml")]
use std::path::Path;
use std::path::PathBuf;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::types::{PcrIndex, PCR_BANK_SIZE};

/// Size in bytes of every derived symmetric key.
pub const KEY_LEN: usize = 32;

/// Smallest challenge nonce accepted by [`Config::validate`].
pub const MIN_NONCE_LEN: usize = 16;

/// Length in bytes of the simulator host seed.
pub const SIMULATOR_SEED_LEN: usize = 32;

const DATABASE_FILE: &str = "fingerprints.db";
const SIMULATOR_SEED_FILE: &str = "simulator.seed";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub measurement: MeasurementConfig,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the fingerprint database and the simulator seed.
    pub dir: PathBuf,
}

/// Which measurement source to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementMode {
    /// Hardware when the TPM is present, simulator otherwise.
    Auto,
    /// Hardware only; startup fails without a TPM.
    Hardware,
    /// Simulator only.
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub mode: MeasurementMode,
    /// PCR indices captured at enrollment.
    pub default_pcrs: Vec<PcrIndex>,
    /// Mount point of sysfs; PCRs are read from `class/tpm/tpm0/pcr-<bank>/`.
    pub sysfs_root: PathBuf,
    /// PCR bank exported by the kernel (`sha256`, `sha1`, ...).
    pub pcr_bank: String,
    /// Hex-encoded 32-byte simulator seed. When absent a seed is generated
    /// once and persisted next to the database.
    pub simulator_seed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Challenge nonce length in bytes.
    pub nonce_len: usize,
    /// Lifetime of an issued challenge (milliseconds).
    pub challenge_ttl_ms: u64,
    /// How long consumed nonces are remembered after expiry (milliseconds).
    pub nonce_retention_ms: u64,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".pcrbind"),
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            mode: MeasurementMode::Auto,
            default_pcrs: vec![0, 1, 2, 3, 7],
            sysfs_root: PathBuf::from("/sys"),
            pcr_bank: "sha256".to_string(),
            simulator_seed: None,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            nonce_len: 32,
            challenge_ttl_ms: 30_000,
            nonce_retention_ms: 600_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.dir.join(DATABASE_FILE)
    }

    pub fn simulator_seed_path(&self) -> PathBuf {
        self.dir.join(SIMULATOR_SEED_FILE)
    }
}

impl MeasurementConfig {
    /// Decode the configured simulator seed, if any.
    pub fn simulator_seed_bytes(&self) -> Result<Option<[u8; SIMULATOR_SEED_LEN]>> {
        let Some(encoded) = &self.simulator_seed else {
            return Ok(None);
        };
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| CoreError::Config(format!("simulator_seed is not hex: {e}")))?;
        let seed: [u8; SIMULATOR_SEED_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            CoreError::Config(format!(
                "simulator_seed must be {SIMULATOR_SEED_LEN} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Some(seed))
    }
}

impl Config {
    /// Load and validate a TOML configuration file.
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    /// Same configuration rooted at a different storage directory.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.check().map_err(|e| {
            warn!(error = %e, "Rejected configuration");
            e
        })
    }

    fn check(&self) -> Result<()> {
        let pcrs = &self.measurement.default_pcrs;
        if pcrs.is_empty() {
            return Err(CoreError::Config("default_pcrs must not be empty".into()));
        }
        if let Some(index) = pcrs.iter().find(|&&i| i >= PCR_BANK_SIZE) {
            return Err(CoreError::Config(format!(
                "PCR index {index} out of range (0..{PCR_BANK_SIZE})"
            )));
        }
        let unique: HashSet<_> = pcrs.iter().collect();
        if unique.len() != pcrs.len() {
            return Err(CoreError::Config("default_pcrs contains duplicates".into()));
        }
        if self.measurement.pcr_bank.is_empty() {
            return Err(CoreError::Config("pcr_bank must not be empty".into()));
        }
        self.measurement.simulator_seed_bytes()?;

        if self.protocol.nonce_len < MIN_NONCE_LEN {
            return Err(CoreError::Config(format!(
                "nonce_len must be at least {MIN_NONCE_LEN} bytes"
            )));
        }
        if self.protocol.challenge_ttl_ms == 0 {
            return Err(CoreError::Config("challenge_ttl_ms must be positive".into()));
        }
        Ok(())
    }
}
