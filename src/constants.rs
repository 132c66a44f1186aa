//! Constants shared across the index store, tracker and run controller.

/// Version of the on-disk index layout. Bumping it invalidates every marker.
pub const INDEX_FORMAT_VERSION: &str = "1";

/// Extension of index partition files.
pub const INDEX_FILE_EXTENSION: &str = "idx";
/// Extension of document content files inside the data directory.
pub const CONTENT_FILE_EXTENSION: &str = "txt";
/// Extension of per-document staleness markers inside the meta directory.
pub const MARKER_FILE_EXTENSION: &str = "indexed";

/// Name of the run-wide lock directory inside the lock directory.
pub const RUN_LOCK_NAME: &str = "_indexer.lock";
/// Sentinel describing the lock owner, written inside the lock directory.
pub const LOCK_SENTINEL_NAME: &str = "owner.json";

/// Prefix of pending-queue temp files.
pub const QUEUE_FILE_PREFIX: &str = "docindex-queue-";

pub const PAGE_INDEX: &str = "page";
pub const TITLE_INDEX: &str = "title";
pub const LENGTHS_INDEX: &str = "lengths";
pub const PAGEWORD_INDEX: &str = "pageword";
pub const METADATA_INDEX: &str = "metadata";
pub const WORD_INDEX: &str = "w";
pub const POSTING_INDEX: &str = "i";

pub const META_REFERENCES_KEY: &str = "relation_references";
pub const META_MEDIA_KEY: &str = "relation_media";

/// Default process memory ceiling (512 MiB).
pub const DEFAULT_MEMORY_CEILING: u64 = 512 * 1024 * 1024;
/// Fraction of the ceiling at which a run restarts itself.
pub const DEFAULT_MEMORY_HIGH_WATER: f64 = 0.5;

/// Shortest token the reference tokenizer keeps, in characters.
pub const MIN_TOKEN_CHARS: usize = 2;
