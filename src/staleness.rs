//! Per-document `.indexed` markers.
//!
//! A marker holds the format version the document was indexed with; its mtime is the time
//! of indexing. A document is stale when it has no marker, the marker records a different
//! version, or the content was modified after the marker was written.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::collab::DocumentStore;
use crate::constants::MARKER_FILE_EXTENSION;
use crate::error::Result;
use crate::id::DocId;

#[derive(Debug, Clone)]
pub struct StalenessTracker {
    meta_dir: PathBuf,
    version: String,
}

impl StalenessTracker {
    pub fn new<P: AsRef<Path>>(meta_dir: P, version: impl Into<String>) -> Self {
        Self {
            meta_dir: meta_dir.as_ref().to_path_buf(),
            version: version.into(),
        }
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn marker_path(&self, id: &DocId) -> PathBuf {
        id.to_path(&self.meta_dir, MARKER_FILE_EXTENSION)
    }

    #[must_use]
    pub fn has_marker(&self, id: &DocId) -> bool {
        self.marker_path(id).is_file()
    }

    /// Whether `id` must be (re)indexed.
    ///
    /// A document without content only needs processing while a marker still claims it is
    /// indexed.
    pub fn needs_indexing(&self, store: &dyn DocumentStore, id: &DocId) -> Result<bool> {
        let Some(content_mtime) = store.content_mtime(id)? else {
            return Ok(self.has_marker(id));
        };

        let marker = self.marker_path(id);
        let marker_meta = match fs_err::metadata(&marker) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        let recorded = fs_err::read_to_string(&marker)?;
        if recorded.trim() != self.version {
            tracing::trace!(doc.id = %id, marker.version = recorded.trim(), "marker version mismatch");
            return Ok(true);
        }
        Ok(content_mtime > marker_meta.modified()?)
    }

    /// Record `id` as indexed from the content read at `indexed_at`.
    ///
    /// The marker mtime is set to `indexed_at` rather than left at the write time, so an edit
    /// made between reading the content and writing the marker still reads as newer.
    pub fn mark_indexed(&self, id: &DocId, indexed_at: SystemTime) -> Result<()> {
        let path = self.marker_path(id);
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(&path, self.version.as_bytes())?;
        let marker = fs_err::OpenOptions::new().write(true).open(&path)?;
        marker.file().set_modified(indexed_at)?;
        Ok(())
    }

    /// Remove the marker of `id`. Returns whether one existed.
    pub fn remove_marker(&self, id: &DocId) -> Result<bool> {
        match fs_err::remove_file(self.marker_path(id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove every marker below the meta directory. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        if !self.meta_dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut pending = vec![self.meta_dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs_err::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                } else if path.extension().and_then(|ext| ext.to_str())
                    == Some(MARKER_FILE_EXTENSION)
                {
                    fs_err::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        tracing::debug!(markers.removed = removed, "markers cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::FsDocumentStore;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn set_mtime(path: &Path, time: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .expect("open")
            .set_modified(time)
            .expect("set mtime");
    }

    #[test]
    fn staleness_flips_with_marker_version_and_mtime() {
        let dir = tempdir().expect("tmp");
        let data = dir.path().join("pages");
        fs_err::create_dir_all(data.join("ns")).expect("mkdir");
        let content = data.join("ns/page.txt");
        fs_err::write(&content, "body").expect("write");
        set_mtime(&content, SystemTime::now() - Duration::from_secs(60));

        let store = FsDocumentStore::new(&data);
        let tracker = StalenessTracker::new(dir.path().join("meta"), "1");
        let id = DocId::parse("ns:page").expect("id");

        assert!(tracker.needs_indexing(&store, &id).expect("check"));
        tracker.mark_indexed(&id, SystemTime::now()).expect("mark");
        assert!(!tracker.needs_indexing(&store, &id).expect("check"));

        set_mtime(&content, SystemTime::now() + Duration::from_secs(60));
        assert!(tracker.needs_indexing(&store, &id).expect("check"));

        tracker.mark_indexed(&id, SystemTime::now()).expect("mark");
        set_mtime(&content, SystemTime::now() - Duration::from_secs(60));
        let upgraded = StalenessTracker::new(dir.path().join("meta"), "1+plain2");
        assert!(upgraded.needs_indexing(&store, &id).expect("check"));
        assert!(!tracker.needs_indexing(&store, &id).expect("check"));
    }

    #[test]
    fn vanished_documents_need_processing_only_while_marked() {
        let dir = tempdir().expect("tmp");
        let store = FsDocumentStore::new(dir.path().join("pages"));
        let tracker = StalenessTracker::new(dir.path().join("meta"), "1");
        let id = DocId::parse("gone").expect("id");

        assert!(!tracker.needs_indexing(&store, &id).expect("check"));
        tracker.mark_indexed(&id, SystemTime::now()).expect("mark");
        assert!(tracker.needs_indexing(&store, &id).expect("check"));
        assert!(tracker.remove_marker(&id).expect("remove"));
        assert!(!tracker.remove_marker(&id).expect("remove again"));
    }

    #[test]
    fn clear_all_removes_only_markers() {
        let dir = tempdir().expect("tmp");
        let meta = dir.path().join("meta");
        let tracker = StalenessTracker::new(&meta, "1");
        for raw in ["a", "ns:b", "ns:deep:c"] {
            tracker
                .mark_indexed(&DocId::parse(raw).expect("id"), SystemTime::now())
                .expect("mark");
        }
        fs_err::write(meta.join("ns/b.meta"), "keep").expect("write");

        assert_eq!(tracker.clear_all().expect("clear"), 3);
        assert!(meta.join("ns/b.meta").exists());
        assert!(!tracker.has_marker(&DocId::parse("ns:b").expect("id")));
    }
}
