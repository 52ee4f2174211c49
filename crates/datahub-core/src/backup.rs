//! Observation time-series backup files.
//!
//! Each backed-up Observation writes its buffered window as one JSON
//! document under the configured backup directory, optionally
//! zstd-compressed. Loading detects compression by magic bytes. The
//! snapshot engine never touches these files.

use crate::config::BackupConfig;
use crate::sample::{SharedSample, Value};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

/// Zstd magic bytes: 0x28 0xB5 0x2F 0xFD.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// On-disk form of one buffered sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSample {
    pub ts: f64,
    #[serde(flatten)]
    pub value: Value,
}

/// On-disk form of an Observation's buffered window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDoc {
    pub path: String,
    pub units: String,
    pub samples: Vec<BackupSample>,
}

/// Backup file for a resource path: slashes mangle to underscores.
pub fn backup_file(cfg: &BackupConfig, path: &str) -> PathBuf {
    let name = path.trim_start_matches('/').replace('/', "_");
    cfg.dir.join(format!("{name}.json"))
}

/// Write the buffered window of the Observation at `path`.
pub fn write(
    cfg: &BackupConfig,
    path: &str,
    units: &str,
    samples: &[SharedSample],
) -> Result<PathBuf> {
    fs::create_dir_all(&cfg.dir)
        .with_context(|| format!("failed to create backup directory {}", cfg.dir.display()))?;

    let doc = BackupDoc {
        path: path.to_string(),
        units: units.to_string(),
        samples: samples
            .iter()
            .map(|s| BackupSample {
                ts: s.timestamp(),
                value: s.value().clone(),
            })
            .collect(),
    };
    let json = serde_json::to_string(&doc).context("failed to serialize backup")?;

    let file = backup_file(cfg, path);
    if cfg.compress {
        let compressed =
            zstd::encode_all(json.as_bytes(), 3).context("failed to compress backup")?;
        fs::write(&file, compressed)
            .with_context(|| format!("failed to write {}", file.display()))?;
    } else {
        fs::write(&file, json).with_context(|| format!("failed to write {}", file.display()))?;
    }
    Ok(file)
}

/// Load a backup file, transparently decompressing zstd.
pub fn load(file: &Path) -> Result<BackupDoc> {
    let raw = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let json = if raw.len() >= 4 && raw[..4] == ZSTD_MAGIC {
        let mut decoder = zstd::Decoder::new(&raw[..]).context("failed to init zstd decoder")?;
        let mut decompressed = String::new();
        decoder
            .read_to_string(&mut decompressed)
            .context("failed to decompress backup")?;
        decompressed
    } else {
        String::from_utf8(raw).context("backup is not valid UTF-8")?
    };

    serde_json::from_str(&json).context("failed to deserialize backup")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use std::rc::Rc;

    fn window() -> Vec<SharedSample> {
        vec![
            Rc::new(Sample::numeric(1.0, 10.0)),
            Rc::new(Sample::numeric(2.0, 20.0)),
            Rc::new(Sample::string(3.0, "hello")),
        ]
    }

    #[test]
    fn test_backup_roundtrip_uncompressed() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = BackupConfig {
            dir: tmp.path().to_path_buf(),
            compress: false,
        };
        let file = write(&cfg, "/obs/temperature", "degC", &window()).unwrap();
        assert_eq!(file.file_name().unwrap(), "obs_temperature.json");

        let doc = load(&file).unwrap();
        assert_eq!(doc.path, "/obs/temperature");
        assert_eq!(doc.units, "degC");
        assert_eq!(doc.samples.len(), 3);
        assert_eq!(doc.samples[0].value, Value::Numeric(10.0));
        assert_eq!(doc.samples[2].value, Value::String("hello".into()));
    }

    #[test]
    fn test_backup_roundtrip_compressed() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = BackupConfig {
            dir: tmp.path().to_path_buf(),
            compress: true,
        };
        let file = write(&cfg, "/obs/t", "", &window()).unwrap();

        // Compressed files start with the zstd magic and still load.
        let raw = std::fs::read(&file).unwrap();
        assert_eq!(&raw[..4], &ZSTD_MAGIC);
        let doc = load(&file).unwrap();
        assert_eq!(doc.samples.len(), 3);
    }
}
