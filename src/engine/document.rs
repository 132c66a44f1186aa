use std::time::SystemTime;

use tracing::instrument;

use crate::collab::{Collaborators, PageData};
use crate::constants::{META_MEDIA_KEY, META_REFERENCES_KEY};
use crate::engine::{IndexEngine, MarkerUpdate};
use crate::error::{IndexerError, Result};
use crate::id::DocId;
use crate::io::store::WriteStatus;

/// What [`IndexEngine::index_document`] did with one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// The document was (re)indexed.
    Indexed,
    /// The marker is current; nothing was done.
    Unchanged,
    /// The document no longer exists and was removed from the index.
    Deleted,
    /// The document opted out of indexing and was removed from the index.
    Disabled,
}

impl DocumentOutcome {
    /// Whether the index was changed for this document.
    #[must_use]
    pub fn changed_index(self) -> bool {
        matches!(self, Self::Indexed | Self::Deleted)
    }
}

impl IndexEngine {
    /// Bring the index entry of `id` up to date.
    ///
    /// Unless `force` is set, a document whose marker is current is left alone. A document
    /// without content is deleted from the index; a page that opts out is deleted as well.
    /// Marker updates are deferred until [`IndexEngine::flush`].
    #[instrument(skip_all, fields(doc.id = %id, force = force))]
    pub fn index_document(
        &mut self,
        id: &DocId,
        force: bool,
        collab: &Collaborators<'_>,
    ) -> Result<DocumentOutcome> {
        if !self.is_writable() {
            return Err(IndexerError::Locked {
                operation: "index_document",
            });
        }

        if !collab.store.id_exists(id) {
            return self.remove_document(id, DocumentOutcome::Deleted);
        }
        if !force && !self.tracker.needs_indexing(collab.store, id)? {
            return Ok(DocumentOutcome::Unchanged);
        }

        let read_at = SystemTime::now();
        let source = collab
            .store
            .read_content(id)
            .map_err(|err| render_error(id, err))?;
        let rendered = collab
            .renderer
            .render(id, &source)
            .map_err(|err| render_error(id, err))?;
        if rendered.metadata.index_disabled {
            tracing::debug!("page opted out of the index");
            return self.remove_document(id, DocumentOutcome::Disabled);
        }

        let pid = self.page_pid(id)?;
        let data = collab.hooks.pre_index(PageData {
            page_id: id.clone(),
            body_text: rendered.body_text,
            metadata: rendered.metadata,
            pid,
        });

        let title = data.metadata.title.as_deref().unwrap_or_default();
        let mut status = self.set_title(pid, title)?;
        status = status.merge(self.add_meta_keys(pid, META_REFERENCES_KEY, &data.metadata.references)?);
        status = status.merge(self.add_meta_keys(pid, META_MEDIA_KEY, &data.metadata.media)?);
        let tokens = collab.renderer.tokenize(&data.body_text);
        status = status.merge(self.add_page_words(pid, &tokens)?);

        collab.hooks.post_index(&data);
        self.defer_marker(MarkerUpdate::Indexed(id.clone(), read_at));
        tracing::debug!(
            doc.pid = pid,
            doc.tokens = tokens.len(),
            index.changed = status.changed(),
            "document indexed"
        );
        Ok(DocumentOutcome::Indexed)
    }

    /// Remove every posting, metadata value and the title of `id`.
    ///
    /// The `page` line is kept so the PID is never reassigned. Returns `Skipped` when the
    /// document was never indexed.
    pub fn delete_page(&mut self, id: &DocId) -> Result<WriteStatus> {
        let Some(pid) = self.lookup_pid(id)? else {
            return Ok(WriteStatus::Skipped);
        };
        let mut status = self.add_page_words(pid, &[])?;
        for key in self.metadata_keys()? {
            status = status.merge(self.update_meta_values(pid, &key, &Default::default())?);
        }
        status = status.merge(self.set_title(pid, "")?);
        if status == WriteStatus::Locked {
            return Err(IndexerError::Locked {
                operation: "delete_page",
            });
        }
        Ok(status)
    }

    fn remove_document(&mut self, id: &DocId, outcome: DocumentOutcome) -> Result<DocumentOutcome> {
        let removed = self.delete_page(id)?.changed();
        let marked = self.tracker.has_marker(id);
        if marked {
            self.defer_marker(MarkerUpdate::Removed(id.clone()));
        }
        if outcome == DocumentOutcome::Deleted && !removed && !marked {
            return Ok(DocumentOutcome::Unchanged);
        }
        Ok(outcome)
    }
}

fn render_error(id: &DocId, err: IndexerError) -> IndexerError {
    match err {
        err @ IndexerError::Render { .. } => err,
        other => IndexerError::Render {
            id: id.to_string(),
            reason: other.to_string(),
        },
    }
}
