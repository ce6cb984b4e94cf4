//! Dump queue command implementation.

use super::load;
use deltasync_protocol::{Delta, Value};
use serde::Serialize;
use std::path::Path;

/// Pending delta representation for output.
#[derive(Debug, Serialize)]
pub struct DeltaInfo {
    /// Queue sequence.
    pub sequence: u64,
    /// Delta id.
    pub delta_id: String,
    /// Model identifier.
    pub identifier: String,
    /// Model-class tag.
    pub model_type: String,
    /// Property path.
    pub property: String,
    /// New value.
    pub value: Value,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl From<Delta> for DeltaInfo {
    fn from(delta: Delta) -> Self {
        Self {
            sequence: delta.sequence,
            delta_id: delta.delta_id.to_string(),
            identifier: delta.identifier,
            model_type: delta.model_type,
            property: delta.property,
            value: delta.value,
            timestamp_ms: delta.timestamp_ms,
        }
    }
}

/// Runs the dump-queue command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load(path)?;
    let total = loaded.deltas.len();
    let deltas: Vec<DeltaInfo> = loaded
        .deltas
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(DeltaInfo::from)
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&deltas)?),
        _ => print_text_output(&deltas, total),
    }
    Ok(())
}

fn print_text_output(deltas: &[DeltaInfo], total: usize) {
    println!("Pending deltas ({} of {} shown)", deltas.len(), total);
    println!("================");
    println!();

    for delta in deltas {
        println!(
            "[{:08}] {:16} {}.{} = {}",
            delta.sequence, delta.identifier, delta.model_type, delta.property, delta.value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_output_uses_plain_values() {
        let mut delta = Delta::new("u1", "User", "tags", Value::map([("vip", Value::Bool(true))]));
        delta.sequence = 7;
        let info = DeltaInfo::from(delta);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["identifier"], "u1");
        assert_eq!(json["value"]["vip"], true);
    }
}
