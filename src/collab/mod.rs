//! Interfaces to the systems the engine indexes on behalf of.
//!
//! The engine never reads markup or walks directories itself: a [`DocumentStore`] owns
//! document storage, a [`PageRenderer`] turns content into indexable text and metadata,
//! [`AccessControl`] filters enumeration, and [`IndexHooks`] lets callers adjust or observe
//! each page as it is indexed.

mod fs;
mod plain;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::DocId;

pub use fs::FsDocumentStore;
pub use plain::PlainTextRenderer;

/// Tuning for [`DocumentStore::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Maximum depth below the walk root; `None` walks everything.
    pub depth: Option<usize>,
    /// List every document regardless of [`AccessControl`].
    pub skip_acl: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            depth: None,
            skip_acl: true,
        }
    }
}

/// One entry reported to a walk visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    Namespace { name: String, depth: usize },
    Document { id: DocId, depth: usize },
}

/// Visitor answer: descend into a namespace / keep a document, or skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDecision {
    Include,
    Skip,
}

/// Storage of the documents being indexed.
pub trait DocumentStore {
    fn id_exists(&self, id: &DocId) -> bool;

    fn content_path(&self, id: &DocId) -> PathBuf;

    /// Last modification time of the content; `None` when the document does not exist.
    fn content_mtime(&self, id: &DocId) -> Result<Option<SystemTime>>;

    fn read_content(&self, id: &DocId) -> Result<String>;

    /// Visit every namespace and document below `namespace` (the whole tree when `None`)
    /// in a stable order.
    fn walk(
        &self,
        namespace: Option<&str>,
        options: WalkOptions,
        visitor: &mut dyn FnMut(WalkEntry) -> WalkDecision,
    ) -> Result<()>;
}

/// Metadata extracted while rendering a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    /// Outgoing references to other documents.
    pub references: BTreeSet<String>,
    /// Referenced media files.
    pub media: BTreeSet<String>,
    /// The page opted out of the index.
    pub index_disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub body_text: String,
    pub metadata: PageMetadata,
}

/// Turns raw content into indexable text and metadata.
pub trait PageRenderer {
    fn render(&self, id: &DocId, source: &str) -> Result<RenderedPage>;

    /// Split body text into index terms. Duplicates are significant (they become counts).
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Changes whenever rendering or tokenizing output changes; recorded in markers.
    fn version(&self) -> String;
}

/// Read permission levels, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    None,
    Read,
    Edit,
}

pub trait AccessControl {
    fn check_read(&self, id: &DocId) -> Permission;
}

/// Grants read access to everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn check_read(&self, _id: &DocId) -> Permission {
        Permission::Edit
    }
}

/// Page data handed through the index hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageData {
    pub page_id: DocId,
    pub body_text: String,
    pub metadata: PageMetadata,
    pub pid: usize,
}

/// Observes and adjusts pages around indexing.
pub trait IndexHooks {
    /// Runs before the page is written to the index; the returned data is what gets indexed.
    fn pre_index(&self, data: PageData) -> PageData {
        data
    }

    fn post_index(&self, _data: &PageData) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl IndexHooks for NoHooks {}

/// The collaborators one run works with.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub store: &'a dyn DocumentStore,
    pub renderer: &'a dyn PageRenderer,
    pub acl: &'a dyn AccessControl,
    pub hooks: &'a dyn IndexHooks,
}

impl<'a> Collaborators<'a> {
    /// Store and renderer with [`AllowAll`] and [`NoHooks`].
    pub fn new(store: &'a dyn DocumentStore, renderer: &'a dyn PageRenderer) -> Self {
        Self {
            store,
            renderer,
            acl: &AllowAll,
            hooks: &NoHooks,
        }
    }

    #[must_use]
    pub fn with_acl(mut self, acl: &'a dyn AccessControl) -> Self {
        self.acl = acl;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: &'a dyn IndexHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("renderer", &self.renderer.version())
            .finish_non_exhaustive()
    }
}
