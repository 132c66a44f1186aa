use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::collab::{DocumentStore, WalkDecision, WalkEntry, WalkOptions};
use crate::constants::CONTENT_FILE_EXTENSION;
use crate::error::Result;
use crate::id::DocId;

/// Documents stored as `<data_dir>/<namespace>/<name>.txt`.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    data_dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn walk_dir(
        &self,
        dir: &Path,
        depth: usize,
        options: WalkOptions,
        visitor: &mut dyn FnMut(WalkEntry) -> WalkDecision,
    ) -> Result<()> {
        let mut entries = Vec::new();
        for entry in fs_err::read_dir(dir)? {
            let entry = entry?;
            entries.push((entry.file_name(), entry.path(), entry.file_type()?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, path, file_type) in entries {
            let Ok(relative) = path.strip_prefix(&self.data_dir) else {
                continue;
            };
            let entry_depth = depth + 1;
            if file_type.is_dir() {
                if options.depth.is_some_and(|limit| entry_depth >= limit) {
                    continue;
                }
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(":");
                let entry = WalkEntry::Namespace {
                    name,
                    depth: entry_depth,
                };
                if visitor(entry) == WalkDecision::Include {
                    self.walk_dir(&path, entry_depth, options, visitor)?;
                }
                continue;
            }

            if path.extension().and_then(|ext| ext.to_str()) != Some(CONTENT_FILE_EXTENSION) {
                continue;
            }
            if options.depth.is_some_and(|limit| entry_depth > limit) {
                continue;
            }
            match DocId::from_relative_path(relative) {
                Ok(id) if self.content_path(&id) != path => {
                    tracing::warn!(
                        path = %path.display(),
                        doc.id = %id,
                        "skipping document whose file name is not a clean ID"
                    );
                }
                Ok(id) => {
                    visitor(WalkEntry::Document {
                        id,
                        depth: entry_depth,
                    });
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unnamed document");
                }
            }
        }
        Ok(())
    }
}

impl DocumentStore for FsDocumentStore {
    fn id_exists(&self, id: &DocId) -> bool {
        self.content_path(id).is_file()
    }

    fn content_path(&self, id: &DocId) -> PathBuf {
        id.to_path(&self.data_dir, CONTENT_FILE_EXTENSION)
    }

    fn content_mtime(&self, id: &DocId) -> Result<Option<SystemTime>> {
        match fs_err::metadata(self.content_path(id)) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_content(&self, id: &DocId) -> Result<String> {
        Ok(fs_err::read_to_string(self.content_path(id))?)
    }

    fn walk(
        &self,
        namespace: Option<&str>,
        options: WalkOptions,
        visitor: &mut dyn FnMut(WalkEntry) -> WalkDecision,
    ) -> Result<()> {
        let root = match namespace.map(str::trim).filter(|ns| !ns.is_empty()) {
            Some(ns) => {
                let cleaned = crate::id::clean_id(ns);
                cleaned
                    .split(':')
                    .fold(self.data_dir.clone(), |path, part| path.join(part))
            }
            None => self.data_dir.clone(),
        };
        if !root.is_dir() {
            tracing::debug!(walk.root = %root.display(), "nothing to walk");
            return Ok(());
        }
        self.walk_dir(&root, 0, options, visitor)
    }
}
