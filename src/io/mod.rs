//! On-disk building blocks: partition files, the write-back cache in front of them, the
//! posting tuple codec, the pending-document queue and the run lock.

pub mod cache;
pub mod lock;
pub mod queue;
pub mod store;
pub mod tuple;

pub use cache::{FlushReport, WriteBackCache};
pub use lock::{LockOwner, RunLock, StaleLockCheck};
pub use queue::{PendingQueue, QueueReader, QueueWriter};
pub use store::{IndexStore, KeyOutcome, LineIndex, PartitionKey, WriteStatus};
pub use tuple::{encode_tuples, parse_tuples, tuple_count, update_tuple};
