//! Read-your-write tokens and the per-identifier token index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Token slot within one identifier.
pub type Slot = u32;

/// Consistency token returned by the remote side after accepting a write.
///
/// An absent `token` means no consistency guarantee is available for the
/// write. `delay_ms` is the minimum propagation delay the server asks the
/// client to honor before a dependent read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReadYourWriteToken {
    /// Opaque server token.
    pub token: Option<String>,
    /// Minimum propagation delay in milliseconds.
    pub delay_ms: Option<u64>,
}

impl ReadYourWriteToken {
    /// Creates a token.
    pub fn new(token: Option<String>, delay_ms: Option<u64>) -> Self {
        Self { token, delay_ms }
    }

    /// Creates a token with a value and delay.
    pub fn with_token(token: impl Into<String>, delay_ms: u64) -> Self {
        Self {
            token: Some(token.into()),
            delay_ms: Some(delay_ms),
        }
    }

    /// A write acknowledged without any consistency token.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns true if no opaque token is present.
    pub fn is_empty(&self) -> bool {
        self.token.is_none()
    }

    /// Returns the propagation delay, zero if absent.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.unwrap_or(0))
    }
}

/// Tokens recorded per identifier and slot.
///
/// Writing a slot overwrites only that slot; other slots and identifiers
/// are never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedTokens {
    entries: HashMap<String, BTreeMap<Slot, ReadYourWriteToken>>,
}

impl IndexedTokens {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a token, returning the one it replaced.
    pub fn insert(
        &mut self,
        identifier: &str,
        slot: Slot,
        token: ReadYourWriteToken,
    ) -> Option<ReadYourWriteToken> {
        self.entries
            .entry(identifier.to_string())
            .or_default()
            .insert(slot, token)
    }

    /// All slots recorded for an identifier.
    pub fn slots(&self, identifier: &str) -> Option<&BTreeMap<Slot, ReadYourWriteToken>> {
        self.entries.get(identifier)
    }

    /// The token stored in one slot.
    pub fn get(&self, identifier: &str, slot: Slot) -> Option<&ReadYourWriteToken> {
        self.entries.get(identifier).and_then(|slots| slots.get(&slot))
    }

    /// Returns true if the slot holds an entry (even an empty token).
    pub fn contains_slot(&self, identifier: &str, slot: Slot) -> bool {
        self.get(identifier, slot).is_some()
    }

    /// Returns true if any slot of the identifier carries an opaque token.
    pub fn has_any_token(&self, identifier: &str) -> bool {
        self.entries
            .get(identifier)
            .is_some_and(|slots| slots.values().any(|t| !t.is_empty()))
    }

    /// The newest token recorded for an identifier.
    ///
    /// Server tokens sort lexicographically in issue order; a present token
    /// always wins over an absent one.
    pub fn newest_token(&self, identifier: &str) -> Option<ReadYourWriteToken> {
        self.entries
            .get(identifier)?
            .values()
            .max_by(|a, b| a.token.cmp(&b.token))
            .cloned()
    }

    /// Drops every slot of an identifier.
    pub fn remove_identifier(&mut self, identifier: &str) -> bool {
        self.entries.remove(identifier).is_some()
    }

    /// Number of identifiers with at least one slot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tokens are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
