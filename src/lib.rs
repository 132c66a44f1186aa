#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are self-describing; public entry points carry docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Casts between PIDs, line IDs and byte counts are bounded by partition sizes.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
//
// Pattern matching: these pedantic lints often suggest changes that reduce clarity.
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
//
#![allow(clippy::needless_pass_by_value)] // engine entry points take owned options intentionally
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)] // run options are naturally a bag of flags
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::unnecessary_wraps)]

//! Incremental maintenance of a line-oriented inverted index over a tree of text documents.
//!
//! The [`IndexEngine`] keeps word, title and metadata indexes in `.idx` partition files,
//! batching every mutation of a run in a write-back cache. The [`RunController`] decides
//! which documents need work, holds the run-wide lock, and stops, resumes or restarts runs
//! without losing progress.

/// The docindex-core crate version (matches `Cargo.toml`).
pub const DOCINDEX_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod collab;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod id;
pub mod io;
pub mod run;
pub mod staleness;

pub use collab::{
    AccessControl, AllowAll, Collaborators, DocumentStore, FsDocumentStore, IndexHooks, NoHooks,
    PageData, PageMetadata, PageRenderer, Permission, PlainTextRenderer, RenderedPage,
    WalkDecision, WalkEntry, WalkOptions,
};
pub use config::{IndexerConfig, parse_byte_size};
pub use engine::{DocumentOutcome, IndexEngine};
pub use error::{IndexerError, Result};
pub use id::DocId;
pub use io::{
    FlushReport, IndexStore, KeyOutcome, LineIndex, PartitionKey, PendingQueue, RunLock,
    StaleLockCheck, WriteBackCache, WriteStatus, update_tuple,
};
pub use run::{
    InterruptToken, ResumePoint, ResumeState, RunController, RunOptions, RunOutcome, RunPhase,
    RunState, RunSummary, install_signal_handlers, restart_process, run_supervised,
};
pub use staleness::StalenessTracker;
