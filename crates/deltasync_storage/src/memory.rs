//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    data: RwLock<Vec<u8>>,
    fail_writes: AtomicBool,
}

/// An in-memory storage backend.
///
/// Clones share the same bytes, so a clone handed to a second queue
/// behaves like the same file opened after a restart.
///
/// Writes can be made to fail with [`InMemoryBackend::set_fail_writes`] to
/// exercise persistence-failure paths.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        let backend = Self::default();
        *backend.shared.data.write() = data;
        backend
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.shared.data.read().clone()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected("in-memory backend is read-only".into()));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_writable()?;
        let mut data = self.shared.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.shared.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_writable()?;
        let mut data = self.shared.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, new_data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        *self.shared.data.write() = new_data.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_bytes() {
        let mut backend = InMemoryBackend::new();
        let reopened = backend.clone();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(reopened.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn truncate_past_end_fails() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::InvalidTruncate { .. })
        ));
        backend.truncate(1).unwrap();
        assert_eq!(backend.data(), b"a");
    }

    #[test]
    fn failing_writes_leave_data_untouched() {
        let mut backend = InMemoryBackend::with_data(b"keep".to_vec());
        backend.set_fail_writes(true);

        assert!(backend.append(b"x").is_err());
        assert!(backend.replace(b"new").is_err());
        assert_eq!(backend.data(), b"keep");

        backend.set_fail_writes(false);
        backend.replace(b"new").unwrap();
        assert_eq!(backend.size().unwrap(), 3);
    }
}
