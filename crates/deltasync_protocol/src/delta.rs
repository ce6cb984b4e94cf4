//! Deltas: recorded model mutations awaiting transmission.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique identifier of a single delta.
pub type DeltaId = Uuid;

/// One model change.
///
/// `Delta` represents a single property mutation on an observed model. It
/// is created synchronously when the model changes and is owned by the
/// operation queue until an executor acknowledges or drops it.
///
/// # Fields
///
/// - `delta_id`: Unique id, used to acknowledge the delta
/// - `identifier`: The model instance the change belongs to
/// - `model_type`: Model-class tag, selects the executor
/// - `property`: Property path that changed
/// - `value`: New value of the property
/// - `sequence`: Queue position, assigned on enqueue
/// - `timestamp_ms`: Wall-clock creation time in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    /// Unique delta ID.
    pub delta_id: DeltaId,
    /// Model identifier.
    pub identifier: String,
    /// Model-class tag.
    pub model_type: String,
    /// Property path.
    pub property: String,
    /// New property value.
    pub value: Value,
    /// Enqueue sequence number (0 until enqueued).
    pub sequence: u64,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl Delta {
    /// Creates a new, not yet enqueued delta.
    pub fn new(
        identifier: impl Into<String>,
        model_type: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            delta_id: Uuid::new_v4(),
            identifier: identifier.into(),
            model_type: model_type.into(),
            property: property.into(),
            value: value.into(),
            sequence: 0,
            timestamp_ms,
        }
    }

    /// Returns true if both deltas set the same property of the same model
    /// to the same value.
    pub fn is_duplicate_of(&self, other: &Delta) -> bool {
        self.identifier == other.identifier
            && self.property == other.property
            && self.value == other.value
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let map = ciborium::Value::Map(vec![
            field("delta_id", ciborium::Value::Bytes(self.delta_id.as_bytes().to_vec())),
            field("identifier", ciborium::Value::Text(self.identifier.clone())),
            field("model_type", ciborium::Value::Text(self.model_type.clone())),
            field("property", ciborium::Value::Text(self.property.clone())),
            field("value", self.value.to_cbor()),
            field("sequence", ciborium::Value::Integer(self.sequence.into())),
            field("timestamp_ms", ciborium::Value::Integer(self.timestamp_ms.into())),
        ]);

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&map, &mut bytes)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value: ciborium::Value = ciborium::de::from_reader(bytes)
            .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        let map = match value {
            ciborium::Value::Map(map) => map,
            _ => return Err(CodecError::invalid_structure("expected map for Delta")),
        };

        let mut fields = Fields(map);

        let id_bytes = match fields.take("delta_id")? {
            ciborium::Value::Bytes(b) => b,
            _ => return Err(CodecError::invalid_structure("delta_id must be bytes")),
        };
        let delta_id = Uuid::from_slice(&id_bytes)
            .map_err(|_| CodecError::invalid_structure("delta_id must be 16 bytes"))?;

        Ok(Self {
            delta_id,
            identifier: fields.take_text("identifier")?,
            model_type: fields.take_text("model_type")?,
            property: fields.take_text("property")?,
            value: Value::from_cbor(fields.take("value")?)?,
            sequence: fields.take_u64("sequence")?,
            timestamp_ms: fields.take_u64("timestamp_ms")?,
        })
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Delta {}.{} on {} = {} (#{})>",
            self.model_type, self.property, self.identifier, self.value, self.sequence
        )
    }
}

fn field(name: &str, value: ciborium::Value) -> (ciborium::Value, ciborium::Value) {
    (ciborium::Value::Text(name.into()), value)
}

struct Fields(Vec<(ciborium::Value, ciborium::Value)>);

impl Fields {
    fn take(&mut self, name: &str) -> CodecResult<ciborium::Value> {
        let pos = self
            .0
            .iter()
            .position(|(k, _)| k.as_text() == Some(name))
            .ok_or_else(|| CodecError::invalid_structure(format!("missing {name}")))?;
        Ok(self.0.swap_remove(pos).1)
    }

    fn take_text(&mut self, name: &str) -> CodecResult<String> {
        match self.take(name)? {
            ciborium::Value::Text(s) => Ok(s),
            _ => Err(CodecError::invalid_structure(format!("{name} must be text"))),
        }
    }

    fn take_u64(&mut self, name: &str) -> CodecResult<u64> {
        match self.take(name)? {
            ciborium::Value::Integer(n) => u64::try_from(n).map_err(|_| CodecError::IntegerOverflow),
            _ => Err(CodecError::invalid_structure(format!("{name} must be an integer"))),
        }
    }
}
