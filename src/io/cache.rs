//! In-memory write-back overlay over [`IndexStore`].
//!
//! A run touches the same handful of partitions for every document (`page`, `pageword`,
//! `title`, the word partitions of common lengths). Parsing them from disk per document is
//! what made the original indexer slow, so the cache loads each partition once, applies every
//! mutation in memory and writes only the dirty partitions back on [`WriteBackCache::flush`].
//! Nothing becomes visible on disk before a flush.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use crate::error::{IndexerError, Result};
use crate::io::store::{IndexStore, KeyOutcome, LineIndex, PartitionKey, WriteStatus, set_line_in};

/// Summary of one successful flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub partitions: Vec<String>,
}

impl FlushReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[derive(Debug)]
pub struct WriteBackCache {
    store: IndexStore,
    partitions: HashMap<PartitionKey, Vec<String>>,
    dirty: BTreeSet<PartitionKey>,
}

impl WriteBackCache {
    #[must_use]
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            partitions: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.store.is_writable()
    }

    /// Whether mutations are waiting for a flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    #[must_use]
    pub fn dirty_partitions(&self) -> Vec<PartitionKey> {
        self.dirty.iter().cloned().collect()
    }

    /// Number of partitions currently held in memory.
    #[must_use]
    pub fn cached_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Drop every cached and dirty partition without writing anything.
    pub fn reset(&mut self) {
        self.partitions.clear();
        self.dirty.clear();
    }

    /// Write every dirty partition through the store.
    ///
    /// Each partition is written with one atomic replace. A partition that fails stays dirty
    /// so a later flush can retry it; the error lists every partition that could not be
    /// written. The read cache is kept either way.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        let mut failed = Vec::new();
        let mut first_error = None;

        let pending: Vec<PartitionKey> = self.dirty.iter().cloned().collect();
        for key in pending {
            let Some(lines) = self.partitions.get(&key) else {
                self.dirty.remove(&key);
                continue;
            };
            match self.store.write_partition(&key, lines) {
                Ok(()) => {
                    self.dirty.remove(&key);
                    report.partitions.push(key.to_string());
                }
                Err(err) => {
                    tracing::error!(index.partition = %key, error = %err, "partition flush failed");
                    failed.push(key.to_string());
                    first_error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        if let Some(reason) = first_error {
            return Err(IndexerError::FlushFailed {
                partitions: failed,
                reason,
            });
        }
        tracing::debug!(
            index.flushed = report.partitions.len(),
            "write-back cache flushed"
        );
        Ok(report)
    }

    fn load(&mut self, key: &PartitionKey) -> Result<&mut Vec<String>> {
        match self.partitions.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let lines = self.store.read_partition(key)?;
                tracing::trace!(index.partition = %key, index.lines = lines.len(), "partition loaded");
                Ok(entry.insert(lines))
            }
        }
    }

    fn mark_dirty(&mut self, key: &PartitionKey) {
        if !self.dirty.contains(key) {
            self.dirty.insert(key.clone());
        }
    }
}

impl LineIndex for WriteBackCache {
    fn get_index(&mut self, key: &PartitionKey) -> Result<Vec<String>> {
        Ok(self.load(key)?.clone())
    }

    fn save_index(&mut self, key: &PartitionKey, lines: Vec<String>) -> Result<WriteStatus> {
        if !self.is_writable() {
            return Ok(WriteStatus::Locked);
        }
        let current = self.load(key)?;
        if *current == lines {
            return Ok(WriteStatus::Skipped);
        }
        *current = lines;
        self.mark_dirty(key);
        Ok(WriteStatus::Success)
    }

    fn get_line(&mut self, key: &PartitionKey, line_id: usize) -> Result<String> {
        Ok(self.load(key)?.get(line_id).cloned().unwrap_or_default())
    }

    fn set_line(
        &mut self,
        key: &PartitionKey,
        line_id: usize,
        value: &str,
    ) -> Result<WriteStatus> {
        if !self.is_writable() {
            return Ok(WriteStatus::Locked);
        }
        if !set_line_in(self.load(key)?, line_id, value) {
            return Ok(WriteStatus::Skipped);
        }
        self.mark_dirty(key);
        Ok(WriteStatus::Success)
    }

    fn add_key(&mut self, key: &PartitionKey, value: &str) -> Result<KeyOutcome> {
        let writable = self.is_writable();
        let lines = self.load(key)?;
        if let Some(found) = lines.iter().position(|line| line == value) {
            return Ok(KeyOutcome::Found(found));
        }
        if !writable {
            return Ok(KeyOutcome::Locked);
        }
        lines.push(value.to_string());
        let id = lines.len() - 1;
        self.mark_dirty(key);
        Ok(KeyOutcome::Inserted(id))
    }

    fn find_key(&mut self, key: &PartitionKey, value: &str) -> Result<Option<usize>> {
        Ok(self.load(key)?.iter().position(|line| line == value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache_in(dir: &std::path::Path) -> WriteBackCache {
        WriteBackCache::new(IndexStore::open(dir).expect("open store"))
    }

    #[test]
    fn add_key_twice_returns_the_same_line() {
        let dir = tempdir().expect("tmp");
        let mut cache = cache_in(dir.path());
        let key = PartitionKey::new("w", "5");

        let first = cache.add_key(&key, "hello").expect("add");
        let second = cache.add_key(&key, "hello").expect("add again");
        assert_eq!(first, KeyOutcome::Inserted(0));
        assert_eq!(second, KeyOutcome::Found(0));
        assert_eq!(cache.get_index(&key).expect("lines"), vec!["hello".to_string()]);
    }

    #[test]
    fn mutations_stay_invisible_until_flush() {
        let dir = tempdir().expect("tmp");
        let mut cache = cache_in(dir.path());
        let mut direct = IndexStore::open_read_only(dir.path());
        let key = PartitionKey::new("title", "");

        cache.set_line(&key, 1, "Second").expect("set");
        cache
            .save_index(&PartitionKey::new("page", ""), vec!["a".into(), "b".into()])
            .expect("save");
        assert!(cache.is_dirty());
        assert!(direct.get_index(&key).expect("direct").is_empty());
        assert!(
            direct
                .get_index(&PartitionKey::new("page", ""))
                .expect("direct")
                .is_empty()
        );

        let report = cache.flush().expect("flush");
        assert_eq!(report.partitions, vec!["page".to_string(), "title".to_string()]);
        assert!(!cache.is_dirty());
        assert_eq!(direct.get_line(&key, 1).expect("direct"), "Second");
        assert_eq!(
            direct
                .get_index(&PartitionKey::new("page", ""))
                .expect("direct"),
            vec!["a".to_string(), "b".to_string()]
        );
        // read cache survives the flush
        assert_eq!(cache.cached_partitions(), 2);
    }

    #[test]
    fn unchanged_writes_do_not_dirty() {
        let dir = tempdir().expect("tmp");
        let mut cache = cache_in(dir.path());
        let key = PartitionKey::new("title", "");
        assert_eq!(cache.set_line(&key, 3, "").expect("set"), WriteStatus::Skipped);
        assert!(!cache.is_dirty());
        assert!(cache.flush().expect("flush").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failed_partition_stays_dirty() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tmp");
        let index_dir = dir.path().join("index");
        let mut cache = cache_in(&index_dir);
        let key = PartitionKey::new("page", "");
        cache.add_key(&key, "a").expect("add");

        fs_err::set_permissions(&index_dir, std::fs::Permissions::from_mode(0o500))
            .expect("chmod");
        let probe = index_dir.join("probe");
        let writable_anyway = std::fs::write(&probe, b"x").is_ok();
        let _ = std::fs::remove_file(&probe);

        let result = cache.flush();
        fs_err::set_permissions(&index_dir, std::fs::Permissions::from_mode(0o700))
            .expect("chmod back");

        if writable_anyway {
            // running as root: permissions are not enforced
            assert!(result.is_ok());
            return;
        }
        match result {
            Err(IndexerError::FlushFailed { partitions, .. }) => {
                assert_eq!(partitions, vec!["page".to_string()]);
            }
            other => panic!("expected flush failure, got {other:?}"),
        }
        assert_eq!(cache.dirty_partitions(), vec![key.clone()]);
        cache.flush().expect("retry succeeds");
        assert!(!cache.is_dirty());
    }

    #[test]
    fn read_only_cache_never_dirties() {
        let dir = tempdir().expect("tmp");
        let mut cache = WriteBackCache::new(IndexStore::open_read_only(dir.path()));
        let key = PartitionKey::new("page", "");
        assert_eq!(cache.add_key(&key, "a").expect("add"), KeyOutcome::Locked);
        assert_eq!(cache.set_line(&key, 0, "a").expect("set"), WriteStatus::Locked);
        assert_eq!(
            cache.save_index(&key, vec!["a".into()]).expect("save"),
            WriteStatus::Locked
        );
        assert!(!cache.is_dirty());
    }
}
