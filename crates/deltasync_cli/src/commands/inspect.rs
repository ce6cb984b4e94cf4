//! Inspect command implementation.

use super::{load, LoadedJournal};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Queue statistics.
#[derive(Debug, Serialize)]
pub struct QueueInfo {
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Intact records in the journal.
    pub records: usize,
    /// Bytes after the last intact record.
    pub torn_bytes: u64,
    /// Pending deltas.
    pub pending: usize,
    /// Distinct identifiers with pending deltas.
    pub identifiers: usize,
    /// Lowest pending sequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_sequence: Option<u64>,
    /// Highest pending sequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<u64>,
    /// Pending deltas per model type.
    pub model_types: BTreeMap<String, usize>,
    /// Entries that could not be decoded.
    pub undecodable: usize,
}

impl QueueInfo {
    fn from_journal(loaded: &LoadedJournal) -> Self {
        let mut model_types = BTreeMap::new();
        for delta in &loaded.deltas {
            *model_types.entry(delta.model_type.clone()).or_insert(0) += 1;
        }
        let identifiers: BTreeSet<&str> =
            loaded.deltas.iter().map(|d| d.identifier.as_str()).collect();

        Self {
            journal_bytes: loaded.report.total_len,
            records: loaded.report.records,
            torn_bytes: loaded.report.torn_bytes(),
            pending: loaded.deltas.len(),
            identifiers: identifiers.len(),
            first_sequence: loaded.deltas.first().map(|d| d.sequence),
            last_sequence: loaded.deltas.last().map(|d| d.sequence),
            model_types,
            undecodable: loaded.undecodable.len(),
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let info = QueueInfo::from_journal(&load(path)?);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => print_text_output(path, &info),
    }
    Ok(())
}

fn print_text_output(path: &Path, info: &QueueInfo) {
    println!("Queue journal: {}", path.display());
    println!("================");
    println!();
    println!("  Journal size:   {} bytes", info.journal_bytes);
    println!("  Records:        {}", info.records);
    if info.torn_bytes > 0 {
        println!("  Torn tail:      {} bytes", info.torn_bytes);
    }
    println!("  Pending deltas: {}", info.pending);
    println!("  Identifiers:    {}", info.identifiers);
    if let (Some(first), Some(last)) = (info.first_sequence, info.last_sequence) {
        println!("  Sequences:      {first}..={last}");
    }
    if info.undecodable > 0 {
        println!("  Undecodable:    {}", info.undecodable);
    }

    if !info.model_types.is_empty() {
        println!();
        println!("Model types:");
        for (model_type, count) in &info.model_types {
            println!("  {model_type:<20} {count}");
        }
    }
}
