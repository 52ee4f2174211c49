//! Hub configuration.
//!
//! Load order: config file (TOML) → environment variables → defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level hub configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub limits: LimitsConfig,
    pub snapshot: SnapshotConfig,
    pub backup: BackupConfig,
}

/// Sample size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum byte length of a String or JSON sample payload. Larger pushes
    /// fail with `Overflow`.
    pub max_string_bytes: usize,
}

/// Snapshot transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Named FIFO used on targets without anonymous pipe support.
    pub fifo_path: PathBuf,
}

/// Observation backup storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding per-Observation time-series backup files.
    pub dir: PathBuf,
    /// Compress backup files with zstd before writing.
    /// Decompression on load is automatic (detected by magic bytes).
    pub compress: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_string_bytes: 50_000,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            fifo_path: PathBuf::from("/tmp/datahub_snapshot_fifo"),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./datahub-backup"),
            compress: false,
        }
    }
}

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

impl HubConfig {
    /// Load config from a TOML file with env var overrides. Falls back to
    /// defaults when `path` is `None` or the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };

        env_override("DATAHUB_MAX_STRING_BYTES", &mut config.limits.max_string_bytes);
        env_override("DATAHUB_SNAPSHOT_FIFO", &mut config.snapshot.fifo_path);
        env_override("DATAHUB_BACKUP_DIR", &mut config.backup.dir);
        env_override("DATAHUB_BACKUP_COMPRESS", &mut config.backup.compress);

        if config.limits.max_string_bytes < 64 {
            anyhow::bail!(
                "max_string_bytes ({}) must be at least 64",
                config.limits.max_string_bytes
            );
        }

        Ok(config)
    }
}
