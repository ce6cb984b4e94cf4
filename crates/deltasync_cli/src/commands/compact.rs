//! Compact command implementation.

use super::load;
use deltasync_storage::{FileBackend, QueueJournal};
use std::path::Path;
use tracing::info;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Records before compaction.
    pub records_before: usize,
    /// Records after compaction.
    pub records_after: usize,
    /// Undecodable entries that will be discarded.
    pub discarded: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load(path)?;
    let stats = CompactStats {
        records_before: loaded.report.records,
        records_after: loaded.deltas.len(),
        discarded: loaded.undecodable.len(),
        bytes_before: loaded.report.total_len,
    };

    println!("Compacting queue journal at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  Records before: {}", stats.records_before);
    println!("  Records after:  {}", stats.records_after);
    if stats.discarded > 0 {
        println!("  Undecodable:    {} (will be discarded)", stats.discarded);
    }
    println!("  Size before:    {} bytes", stats.bytes_before);

    if dry_run {
        return Ok(());
    }
    if stats.records_after == stats.records_before && loaded.report.torn_bytes() == 0 {
        println!();
        println!("No compaction needed - journal is already minimal");
        return Ok(());
    }

    let bytes_after = perform_compaction(path)?;
    println!("  Size after:     {bytes_after} bytes");
    println!();
    println!("✓ Compaction complete");
    Ok(())
}

/// Rewrites the journal to its decodable live entries, returning its new size.
fn perform_compaction(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let backend = FileBackend::open(path)?;
    let (mut journal, _) = QueueJournal::open(Box::new(backend), true)?;

    // Reload after open so a truncated tail is not carried over.
    let loaded = load(path)?;
    let live: Vec<_> = loaded
        .deltas
        .iter()
        .map(|d| d.encode().map(|payload| (*d.delta_id.as_bytes(), payload)))
        .collect::<Result<_, _>>()?;
    journal.compact(live.iter().map(|(key, payload)| (*key, payload.as_slice())))?;
    drop(journal);

    let size = std::fs::metadata(path)?.len();
    info!(records = live.len(), bytes = size, "journal compacted");
    Ok(size)
}
