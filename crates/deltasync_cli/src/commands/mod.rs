//! CLI command implementations.

pub mod compact;
pub mod dump_queue;
pub mod inspect;
pub mod verify;

use deltasync_protocol::Delta;
use deltasync_storage::{replay, FileBackend, ReplayReport, StorageBackend};
use std::path::Path;
use tracing::debug;

/// A journal read without modifying it.
pub struct LoadedJournal {
    /// Raw replay outcome.
    pub report: ReplayReport,
    /// Decoded deltas in enqueue order.
    pub deltas: Vec<Delta>,
    /// Entries whose payload did not decode, as (entry index, reason).
    pub undecodable: Vec<(usize, String)>,
}

/// Replays the journal at `path` and decodes its live entries.
pub fn load(path: &Path) -> Result<LoadedJournal, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Journal file not found: {}", path.display()).into());
    }

    let backend = FileBackend::open(path)?;
    let bytes = backend.read_all()?;
    let report = replay(&bytes);
    debug!(records = report.records, live = report.entries.len(), "journal replayed");

    let mut deltas = Vec::with_capacity(report.entries.len());
    let mut undecodable = Vec::new();
    for (index, entry) in report.entries.iter().enumerate() {
        match Delta::decode(&entry.payload) {
            Ok(delta) => deltas.push(delta),
            Err(err) => undecodable.push((index, err.to_string())),
        }
    }
    deltas.sort_by_key(|d| d.sequence);

    Ok(LoadedJournal {
        report,
        deltas,
        undecodable,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_returns_live_deltas_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.journal");
        let expected = testing::write_journal(&path, 4);

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.deltas, expected);
        assert_eq!(loaded.report.records, 5);
        assert!(loaded.undecodable.is_empty());
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(load(&dir.path().join("missing.journal")).is_err());
    }
}
