//! Append-only journal that persists the delta queue.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it.
//!
//! - `Append` payload: `key (16) | entry bytes`
//! - `Remove` payload: `key (16)`
//!
//! Replaying the records in order yields the live entries in the order they
//! were appended. Replay stops at the first record that is truncated or fails
//! its checksum; everything from there on is a torn tail and is dropped when
//! the journal is opened.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"DSQJ";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// Size of an entry key.
pub const KEY_SIZE: usize = 16;

/// Key of a journal entry (the delta id bytes).
pub type EntryKey = [u8; KEY_SIZE];

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// An entry was appended.
    Append = 1,
    /// An entry was removed.
    Remove = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Append),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A live journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Entry key.
    pub key: EntryKey,
    /// Opaque entry bytes.
    pub payload: Vec<u8>,
}

/// Outcome of replaying journal bytes.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Live entries in append order.
    pub entries: Vec<JournalEntry>,
    /// Number of intact records.
    pub records: usize,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Total length of the replayed bytes.
    pub total_len: u64,
}

impl ReplayReport {
    /// Bytes after the intact prefix.
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Replays journal bytes without modifying anything.
pub fn replay(bytes: &[u8]) -> ReplayReport {
    let mut slots: Vec<Option<JournalEntry>> = Vec::new();
    let mut index: HashMap<EntryKey, usize> = HashMap::new();
    let mut offset = 0usize;
    let mut records = 0usize;

    while let Some((record_type, payload, next)) = read_record(bytes, offset) {
        let Some(key) = payload.get(..KEY_SIZE).and_then(|k| EntryKey::try_from(k).ok()) else {
            break;
        };
        match record_type {
            RecordType::Append => {
                if let Some(old) = index.insert(key, slots.len()) {
                    slots[old] = None;
                }
                slots.push(Some(JournalEntry {
                    key,
                    payload: payload[KEY_SIZE..].to_vec(),
                }));
            }
            RecordType::Remove => {
                if let Some(pos) = index.remove(&key) {
                    slots[pos] = None;
                }
            }
        }
        records += 1;
        offset = next;
    }

    ReplayReport {
        entries: slots.into_iter().flatten().collect(),
        records,
        valid_len: offset as u64,
        total_len: bytes.len() as u64,
    }
}

fn read_record(bytes: &[u8], offset: usize) -> Option<(RecordType, &[u8], usize)> {
    let header = bytes.get(offset..offset + HEADER_SIZE)?;
    if header[0..4] != JOURNAL_MAGIC {
        return None;
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != JOURNAL_VERSION {
        return None;
    }
    let record_type = RecordType::from_byte(header[6])?;
    let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

    let body_end = offset + HEADER_SIZE + len;
    let crc_bytes = bytes.get(body_end..body_end + CRC_SIZE)?;
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if compute_crc32(&bytes[offset..body_end]) != stored {
        return None;
    }

    Some((
        record_type,
        &bytes[offset + HEADER_SIZE..body_end],
        body_end + CRC_SIZE,
    ))
}

fn encode_record(out: &mut Vec<u8>, record_type: RecordType, key: &EntryKey, payload: &[u8]) -> StorageResult<()> {
    let body_len = KEY_SIZE + payload.len();
    let len = u32::try_from(body_len).map_err(|_| StorageError::RecordTooLarge(body_len))?;

    let start = out.len();
    out.extend_from_slice(&JOURNAL_MAGIC);
    out.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    out.push(record_type as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(payload);
    let crc = compute_crc32(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Computes the IEEE CRC32 checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

/// Durable, append-only log of queue entries.
///
/// Every enqueue writes one `Append` record and every acknowledgement one
/// `Remove` record. [`QueueJournal::compact`] rewrites the journal to just
/// the live entries through [`StorageBackend::replace`].
pub struct QueueJournal {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    records: usize,
}

impl QueueJournal {
    /// Opens a journal, replaying its contents.
    ///
    /// A torn tail is truncated away before the journal accepts writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or truncated.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> StorageResult<(Self, ReplayReport)> {
        let bytes = backend.read_all()?;
        let report = replay(&bytes);

        if report.torn_bytes() > 0 {
            warn!(
                torn_bytes = report.torn_bytes(),
                valid_len = report.valid_len,
                "dropping torn journal tail"
            );
            backend.truncate(report.valid_len)?;
            backend.sync()?;
        }
        debug!(
            records = report.records,
            live = report.entries.len(),
            "journal replayed"
        );

        let journal = Self {
            backend,
            sync_on_write,
            records: report.records,
        };
        Ok((journal, report))
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn append(&mut self, key: &EntryKey, payload: &[u8]) -> StorageResult<()> {
        let mut data = Vec::with_capacity(HEADER_SIZE + KEY_SIZE + payload.len() + CRC_SIZE);
        encode_record(&mut data, RecordType::Append, key, payload)?;
        self.write(&data, 1)
    }

    /// Removes entries, writing all records in one append.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be written.
    pub fn remove<'a>(&mut self, keys: impl IntoIterator<Item = &'a EntryKey>) -> StorageResult<()> {
        let mut data = Vec::new();
        let mut count = 0;
        for key in keys {
            encode_record(&mut data, RecordType::Remove, key, &[])?;
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }
        self.write(&data, count)
    }

    /// Rewrites the journal so it holds exactly `live`, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement could not be made durable; the
    /// previous journal is then left intact.
    pub fn compact<'a>(
        &mut self,
        live: impl IntoIterator<Item = (EntryKey, &'a [u8])>,
    ) -> StorageResult<()> {
        let mut data = Vec::new();
        let mut count = 0;
        for (key, payload) in live {
            encode_record(&mut data, RecordType::Append, &key, payload)?;
            count += 1;
        }
        self.backend.replace(&data)?;
        debug!(records = count, bytes = data.len(), "journal compacted");
        self.records = count;
        Ok(())
    }

    /// Number of records written since the last compaction.
    pub fn record_count(&self) -> usize {
        self.records
    }

    fn write(&mut self, data: &[u8], count: usize) -> StorageResult<()> {
        self.backend.append(data)?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        self.records += count;
        Ok(())
    }
}
