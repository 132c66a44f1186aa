//! Directory layout and tunables for an indexing run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MEMORY_CEILING, DEFAULT_MEMORY_HIGH_WATER, INDEX_FORMAT_VERSION};
use crate::error::{IndexerError, Result};

/// Where the engine finds documents, markers, index partitions, locks and queue files.
///
/// Every field has a default so a JSON config only needs to name what differs; relative
/// directories are resolved against the file's own directory by [`IndexerConfig::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub data_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub index_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// Hard memory ceiling of one process instance, in bytes.
    pub memory_ceiling: u64,
    /// Fraction of `memory_ceiling` above which the run flushes and restarts.
    pub memory_high_water: f64,
    /// Appended to the format version so renderer upgrades invalidate markers.
    pub version_suffix: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::from_root(".")
    }
}

impl IndexerConfig {
    /// Standard layout below a single root: `pages/`, `meta/`, `index/`, `locks/`, `tmp/`.
    pub fn from_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("pages"),
            meta_dir: root.join("meta"),
            index_dir: root.join("index"),
            lock_dir: root.join("locks"),
            tmp_dir: root.join("tmp"),
            memory_ceiling: DEFAULT_MEMORY_CEILING,
            memory_high_water: DEFAULT_MEMORY_HIGH_WATER,
            version_suffix: None,
        }
    }

    /// Read a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs_err::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_relative(&mut self, base: &Path) {
        for dir in [
            &mut self.data_dir,
            &mut self.meta_dir,
            &mut self.index_dir,
            &mut self.lock_dir,
            &mut self.tmp_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.memory_high_water > 0.0 && self.memory_high_water <= 1.0) {
            return Err(IndexerError::Config {
                reason: format!(
                    "memory_high_water must be in (0, 1], got {}",
                    self.memory_high_water
                ),
            });
        }
        if self.memory_ceiling == 0 {
            return Err(IndexerError::Config {
                reason: "memory_ceiling must be non-zero".into(),
            });
        }
        if let Some(suffix) = &self.version_suffix {
            if suffix.contains(['\n', '\r']) {
                return Err(IndexerError::Config {
                    reason: "version_suffix must be a single line".into(),
                });
            }
        }
        Ok(())
    }

    /// Resident-set size, in bytes, that triggers a restart.
    #[must_use]
    pub fn memory_high_water_bytes(&self) -> u64 {
        (self.memory_ceiling as f64 * self.memory_high_water) as u64
    }

    /// Version string recorded in every marker.
    #[must_use]
    pub fn format_version(&self) -> String {
        match &self.version_suffix {
            Some(suffix) if !suffix.is_empty() => format!("{INDEX_FORMAT_VERSION}+{suffix}"),
            _ => INDEX_FORMAT_VERSION.to_string(),
        }
    }

    /// Create every configured directory that does not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.data_dir,
            &self.meta_dir,
            &self.index_dir,
            &self.lock_dir,
            &self.tmp_dir,
        ] {
            fs_err::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Parse a memory size such as `512M`, `2g`, `64k` or a plain byte count.
pub fn parse_byte_size(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let invalid = || IndexerError::Config {
        reason: format!("invalid memory size {raw:?}"),
    };
    let (digits, multiplier) = match raw.char_indices().last() {
        Some((at, 'k' | 'K')) => (&raw[..at], 1024),
        Some((at, 'm' | 'M')) => (&raw[..at], 1024 * 1024),
        Some((at, 'g' | 'G')) => (&raw[..at], 1024 * 1024 * 1024),
        Some(_) => (raw, 1),
        None => return Err(invalid()),
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}
