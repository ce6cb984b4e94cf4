//! Verify command implementation.

use super::{load, LoadedJournal};
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of intact records.
    pub valid_records: usize,
    /// Bytes after the last intact record.
    pub torn_bytes: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn check(loaded: &LoadedJournal) -> Self {
        let mut errors = Vec::new();

        if loaded.report.torn_bytes() > 0 {
            errors.push(format!(
                "Torn or corrupt tail at offset {}: {} bytes",
                loaded.report.valid_len,
                loaded.report.torn_bytes()
            ));
        }
        for (index, reason) in &loaded.undecodable {
            errors.push(format!("Entry {index} does not decode: {reason}"));
        }

        let mut sequences = HashSet::new();
        for delta in &loaded.deltas {
            if !sequences.insert(delta.sequence) {
                errors.push(format!(
                    "Duplicate sequence {} (delta {})",
                    delta.sequence, delta.delta_id
                ));
            }
        }

        Self {
            valid_records: loaded.report.records,
            torn_bytes: loaded.report.torn_bytes(),
            errors,
        }
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying queue journal at {}", path.display());
    println!();

    let result = VerifyResult::check(&load(path)?);
    println!("  Valid records: {}", result.valid_records);
    println!("  Torn bytes:    {}", result.torn_bytes);
    for error in &result.errors {
        println!("  ✗ {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}
