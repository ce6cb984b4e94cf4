//! # DeltaSync Storage
//!
//! Durable storage for the pending delta queue.
//!
//! Backends are **opaque byte stores**; [`QueueJournal`] owns the record
//! format and never interprets entry payloads.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral queues
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use deltasync_storage::{InMemoryBackend, QueueJournal};
//!
//! let backend = InMemoryBackend::new();
//! let (mut journal, report) = QueueJournal::open(Box::new(backend.clone()), true).unwrap();
//! assert!(report.entries.is_empty());
//!
//! journal.append(&[7u8; 16], b"delta bytes").unwrap();
//! let (_, report) = QueueJournal::open(Box::new(backend), true).unwrap();
//! assert_eq!(report.entries.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use journal::{
    compute_crc32, replay, EntryKey, JournalEntry, QueueJournal, RecordType, ReplayReport,
    JOURNAL_MAGIC, JOURNAL_VERSION, KEY_SIZE,
};
pub use memory::InMemoryBackend;
