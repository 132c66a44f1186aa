//! Suffix-partitioned, line-oriented index files.
//!
//! A partition `(name, suffix)` lives in `<index_dir>/<name><suffix>.idx`. Line numbers are
//! the surrogate keys ("line IDs") used throughout the index, so lines are never removed or
//! reordered by this layer: growth is append-only and deletion means writing an empty value.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;

use crate::constants::INDEX_FILE_EXTENSION;
use crate::error::Result;

/// Identifies one partition of a logical index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub name: String,
    pub suffix: String,
}

impl PartitionKey {
    pub fn new(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: suffix.into(),
        }
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{}.{INDEX_FILE_EXTENSION}", self.name, self.suffix)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.suffix)
    }
}

/// Result of a mutating index operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The partition changed.
    Success,
    /// The requested state was already in place; nothing changed.
    Skipped,
    /// The handle is read-only; nothing changed.
    Locked,
}

impl WriteStatus {
    /// Fold two statuses: `Locked` dominates, then `Success`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Locked, _) | (_, Self::Locked) => Self::Locked,
            (Self::Success, _) | (_, Self::Success) => Self::Success,
            _ => Self::Skipped,
        }
    }

    #[must_use]
    pub fn changed(self) -> bool {
        self == Self::Success
    }
}

/// Result of [`LineIndex::add_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The value already existed at this line.
    Found(usize),
    /// The value was appended at this line.
    Inserted(usize),
    /// The value is absent and the handle is read-only.
    Locked,
}

impl KeyOutcome {
    #[must_use]
    pub fn line_id(self) -> Option<usize> {
        match self {
            Self::Found(id) | Self::Inserted(id) => Some(id),
            Self::Locked => None,
        }
    }

    #[must_use]
    pub fn status(self) -> WriteStatus {
        match self {
            Self::Found(_) => WriteStatus::Skipped,
            Self::Inserted(_) => WriteStatus::Success,
            Self::Locked => WriteStatus::Locked,
        }
    }
}

/// Line-level access to index partitions, implemented by the raw store and by the
/// write-back cache that fronts it during a run.
pub trait LineIndex {
    /// Every line of a partition; a missing partition is empty.
    fn get_index(&mut self, key: &PartitionKey) -> Result<Vec<String>>;

    /// Replace the whole partition.
    fn save_index(&mut self, key: &PartitionKey, lines: Vec<String>) -> Result<WriteStatus>;

    /// One line; an empty string past the end of the partition.
    fn get_line(&mut self, key: &PartitionKey, line_id: usize) -> Result<String>;

    /// Overwrite one line, padding the partition with empty lines if needed.
    fn set_line(&mut self, key: &PartitionKey, line_id: usize, value: &str)
    -> Result<WriteStatus>;

    /// Line ID of `value`, appending it when absent.
    fn add_key(&mut self, key: &PartitionKey, value: &str) -> Result<KeyOutcome>;

    /// Line ID of `value` without inserting it.
    fn find_key(&mut self, key: &PartitionKey, value: &str) -> Result<Option<usize>> {
        Ok(self.get_index(key)?.iter().position(|line| line == value))
    }
}

/// Direct, uncached access to the partition files of one index directory.
///
/// Every write replaces the file atomically (temp file + rename), so a concurrent reader sees
/// either the previous or the new partition, never a torn one.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
    writable: bool,
}

impl IndexStore {
    /// Open `dir` for reading and writing, creating it when missing.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs_err::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writable: true,
        })
    }

    /// Open `dir` for reading only; every mutation reports [`WriteStatus::Locked`].
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            writable: false,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    #[must_use]
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read a partition from disk.
    pub fn read_partition(&self, key: &PartitionKey) -> Result<Vec<String>> {
        let path = self.partition_path(key);
        let file = match fs_err::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            lines.push(line.trim_end_matches('\r').to_string());
        }
        Ok(lines)
    }

    /// Atomically replace a partition on disk.
    pub fn write_partition(&self, key: &PartitionKey, lines: &[String]) -> Result<()> {
        let path = self.partition_path(key);
        let mut file = AtomicWriteFile::open(&path)?;
        {
            let mut writer = std::io::BufWriter::new(&mut file);
            for line in lines {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        file.commit()?;
        tracing::debug!(
            index.partition = %key,
            index.lines = lines.len(),
            "partition written"
        );
        Ok(())
    }

    /// Every partition currently present on disk.
    pub fn partitions(&self) -> Result<Vec<PartitionKey>> {
        let entries = match fs_err::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(INDEX_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(split_partition_stem(stem));
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove every partition file. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        if !self.writable {
            return Ok(0);
        }
        let mut removed = 0;
        for key in self.partitions()? {
            fs_err::remove_file(self.partition_path(&key))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Split a file stem such as `w12` or `relation_media_i` back into `(name, suffix)`.
///
/// Word partitions carry their length as a numeric suffix; everything else is stored without
/// a suffix.
fn split_partition_stem(stem: &str) -> PartitionKey {
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && digits < stem.len() {
        let (name, suffix) = stem.split_at(stem.len() - digits);
        PartitionKey::new(name, suffix)
    } else {
        PartitionKey::new(stem, "")
    }
}

impl LineIndex for IndexStore {
    fn get_index(&mut self, key: &PartitionKey) -> Result<Vec<String>> {
        self.read_partition(key)
    }

    fn save_index(&mut self, key: &PartitionKey, lines: Vec<String>) -> Result<WriteStatus> {
        if !self.writable {
            return Ok(WriteStatus::Locked);
        }
        self.write_partition(key, &lines)?;
        Ok(WriteStatus::Success)
    }

    fn get_line(&mut self, key: &PartitionKey, line_id: usize) -> Result<String> {
        Ok(self
            .read_partition(key)?
            .into_iter()
            .nth(line_id)
            .unwrap_or_default())
    }

    fn set_line(
        &mut self,
        key: &PartitionKey,
        line_id: usize,
        value: &str,
    ) -> Result<WriteStatus> {
        if !self.writable {
            return Ok(WriteStatus::Locked);
        }
        let mut lines = self.read_partition(key)?;
        if !set_line_in(&mut lines, line_id, value) {
            return Ok(WriteStatus::Skipped);
        }
        self.write_partition(key, &lines)?;
        Ok(WriteStatus::Success)
    }

    fn add_key(&mut self, key: &PartitionKey, value: &str) -> Result<KeyOutcome> {
        let mut lines = self.read_partition(key)?;
        if let Some(found) = lines.iter().position(|line| line == value) {
            return Ok(KeyOutcome::Found(found));
        }
        if !self.writable {
            return Ok(KeyOutcome::Locked);
        }
        lines.push(value.to_string());
        self.write_partition(key, &lines)?;
        Ok(KeyOutcome::Inserted(lines.len() - 1))
    }
}

/// Write `value` at `line_id`, padding with empty lines. Returns whether anything changed.
pub(crate) fn set_line_in(lines: &mut Vec<String>, line_id: usize, value: &str) -> bool {
    match lines.get_mut(line_id) {
        Some(existing) if existing == value => false,
        Some(existing) => {
            value.clone_into(existing);
            true
        }
        None if value.is_empty() => false,
        None => {
            lines.resize(line_id, String::new());
            lines.push(value.to_string());
            true
        }
    }
}
