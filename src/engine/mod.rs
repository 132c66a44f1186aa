//! The index engine: one explicit context object owning the write-back cache, the staleness
//! tracker and the marker updates waiting for the next flush.
//!
//! Responsibilities are split across `impl` blocks:
//! - `words`: the word index (`w<len>`, `i<len>`, `lengths`, `pageword`).
//! - `meta`: metadata indexes (`metadata`, `<key>_w`, `<key>_i`, `<key>_p`) and titles.
//! - `document`: per-document indexing and deletion.

mod document;
mod meta;
mod words;

use std::time::SystemTime;

use crate::config::IndexerConfig;
use crate::constants::PAGE_INDEX;
use crate::error::{IndexerError, Result};
use crate::id::DocId;
use crate::io::cache::{FlushReport, WriteBackCache};
use crate::io::store::{IndexStore, KeyOutcome, LineIndex, PartitionKey};
use crate::staleness::StalenessTracker;

pub use document::DocumentOutcome;

/// Marker change applied only once the index mutations behind it are on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MarkerUpdate {
    /// Indexed from content read at the given time.
    Indexed(DocId, SystemTime),
    Removed(DocId),
}

#[derive(Debug)]
pub struct IndexEngine {
    cache: WriteBackCache,
    tracker: StalenessTracker,
    pending_markers: Vec<MarkerUpdate>,
}

impl IndexEngine {
    /// Open the index for a run. The caller must hold the run lock.
    pub fn open_writable(config: &IndexerConfig) -> Result<Self> {
        let store = IndexStore::open(&config.index_dir)?;
        Ok(Self::with_store(store, config))
    }

    /// Open the index for lookups only; every mutation fails with [`IndexerError::Locked`].
    pub fn open_read_only(config: &IndexerConfig) -> Self {
        Self::with_store(IndexStore::open_read_only(&config.index_dir), config)
    }

    fn with_store(store: IndexStore, config: &IndexerConfig) -> Self {
        Self {
            cache: WriteBackCache::new(store),
            tracker: StalenessTracker::new(&config.meta_dir, config.format_version()),
            pending_markers: Vec::new(),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &StalenessTracker {
        &self.tracker
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.cache.is_writable()
    }

    /// Whether index mutations or marker updates are waiting for a flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.cache.is_dirty() || !self.pending_markers.is_empty()
    }

    /// PID of `id`, assigning the next free one on first sight.
    pub fn page_pid(&mut self, id: &DocId) -> Result<usize> {
        let key = PartitionKey::new(PAGE_INDEX, "");
        match self.cache.add_key(&key, id.as_str())? {
            KeyOutcome::Found(pid) | KeyOutcome::Inserted(pid) => Ok(pid),
            KeyOutcome::Locked => Err(IndexerError::Locked {
                operation: "page_pid",
            }),
        }
    }

    /// PID of `id` if it was ever indexed.
    pub fn lookup_pid(&mut self, id: &DocId) -> Result<Option<usize>> {
        self.cache
            .find_key(&PartitionKey::new(PAGE_INDEX, ""), id.as_str())
    }

    /// Every document ID the `page` index knows about.
    pub fn known_pages(&mut self) -> Result<Vec<DocId>> {
        let lines = self.cache.get_index(&PartitionKey::new(PAGE_INDEX, ""))?;
        Ok(lines
            .iter()
            .filter(|line| !line.is_empty())
            .filter_map(|line| DocId::parse(line).ok())
            .collect())
    }

    /// Write every dirty partition, then apply the deferred marker updates.
    ///
    /// When the partition write fails no marker is touched, so every affected document is
    /// still considered stale by the next run.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let report = self.cache.flush()?;

        let pending = std::mem::take(&mut self.pending_markers);
        for (position, update) in pending.iter().enumerate() {
            let applied = match update {
                MarkerUpdate::Indexed(id, indexed_at) => {
                    self.tracker.mark_indexed(id, *indexed_at)
                }
                MarkerUpdate::Removed(id) => self.tracker.remove_marker(id).map(|_| ()),
            };
            if let Err(err) = applied {
                self.pending_markers = pending[position..].to_vec();
                return Err(err);
            }
        }
        if !pending.is_empty() {
            tracing::debug!(markers.applied = pending.len(), "markers updated");
        }
        Ok(report)
    }

    /// Remove every partition and marker.
    pub fn clear(&mut self) -> Result<()> {
        if !self.is_writable() {
            return Err(IndexerError::Locked { operation: "clear" });
        }
        self.cache.reset();
        self.pending_markers.clear();
        let partitions = self.cache.store().clear()?;
        let markers = self.tracker.clear_all()?;
        tracing::info!(
            index.partitions = partitions,
            markers.removed = markers,
            "index cleared"
        );
        Ok(())
    }

    fn defer_marker(&mut self, update: MarkerUpdate) {
        self.pending_markers.push(update);
    }
}
