//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store holding one persisted queue journal.
///
/// Backends are **opaque byte stores**. The journal owns the record format;
/// backends only read, append, truncate and atomically replace bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns exactly the bytes written so far
/// - `replace` is atomic: after a crash either the old or the new contents
///   are visible, never a mix
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads the full contents.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to drop a torn tail after a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents could not be made durable; the
    /// old contents are then still in place.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
