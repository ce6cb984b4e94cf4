//! Conditions gating a dependent read.

use deltasync_protocol::{IndexedTokens, ReadYourWriteToken, Slot};

/// A predicate over the recorded tokens.
///
/// Conditions are read-only: they inspect the token index and never modify
/// it. Any component can add a variant by implementing this trait; the
/// manager only relies on `condition_id` as a stable key.
pub trait Condition: Send + Sync {
    /// Stable key naming this kind of condition.
    fn condition_id(&self) -> &str;

    /// Returns true once enough has been written for the dependent read.
    fn is_met(&self, tokens: &IndexedTokens) -> bool;

    /// The token the dependent read should present.
    fn newest_token(&self, tokens: &IndexedTokens) -> Option<ReadYourWriteToken>;
}

/// Met as soon as any slot of the identifier carries a token.
#[derive(Debug, Clone)]
pub struct TokenPresentCondition {
    identifier: String,
}

impl TokenPresentCondition {
    /// Condition id.
    pub const CONDITION_ID: &'static str = "TokenPresentCondition";

    /// Creates the condition for one identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

impl Condition for TokenPresentCondition {
    fn condition_id(&self) -> &str {
        Self::CONDITION_ID
    }

    fn is_met(&self, tokens: &IndexedTokens) -> bool {
        tokens.has_any_token(&self.identifier)
    }

    fn newest_token(&self, tokens: &IndexedTokens) -> Option<ReadYourWriteToken> {
        tokens.newest_token(&self.identifier)
    }
}

/// Met when every listed slot of the identifier has been recorded.
#[derive(Debug, Clone)]
pub struct SlotsRecordedCondition {
    identifier: String,
    slots: Vec<Slot>,
}

impl SlotsRecordedCondition {
    /// Condition id.
    pub const CONDITION_ID: &'static str = "SlotsRecordedCondition";

    /// Creates the condition.
    pub fn new(identifier: impl Into<String>, slots: impl IntoIterator<Item = Slot>) -> Self {
        Self {
            identifier: identifier.into(),
            slots: slots.into_iter().collect(),
        }
    }
}

impl Condition for SlotsRecordedCondition {
    fn condition_id(&self) -> &str {
        Self::CONDITION_ID
    }

    fn is_met(&self, tokens: &IndexedTokens) -> bool {
        self.slots
            .iter()
            .all(|slot| tokens.contains_slot(&self.identifier, *slot))
    }

    fn newest_token(&self, tokens: &IndexedTokens) -> Option<ReadYourWriteToken> {
        tokens.newest_token(&self.identifier)
    }
}

/// Fixed token slots written before in-app messages can be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IamFetchOffset {
    /// The user was created.
    UserCreate = 0,
    /// User properties were updated.
    UserUpdate = 1,
    /// The push subscription was updated.
    SubscriptionUpdate = 2,
}

impl IamFetchOffset {
    /// The slot this offset occupies.
    pub const fn slot(self) -> Slot {
        self as Slot
    }
}

/// Gates fetching in-app messages on the user's pending writes.
///
/// Met when the user-create slot is recorded, or when the user-update slot
/// is recorded and (while a subscription update is pending) the
/// subscription-update slot too.
///
/// Whether a subscription update is pending is fixed at construction, so
/// the predicate cannot change under a registered waiter.
#[derive(Debug, Clone)]
pub struct IamFetchReadyCondition {
    identifier: String,
    subscription_update_pending: bool,
}

impl IamFetchReadyCondition {
    /// Condition id.
    pub const CONDITION_ID: &'static str = "IamFetchReadyCondition";

    /// Creates the condition for one user identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            subscription_update_pending: false,
        }
    }

    /// Requires the subscription-update slot as well when `pending` is set.
    pub fn with_subscription_update_pending(mut self, pending: bool) -> Self {
        self.subscription_update_pending = pending;
        self
    }

    /// Returns true if a subscription update is awaited.
    pub fn subscription_update_pending(&self) -> bool {
        self.subscription_update_pending
    }

    fn has(&self, tokens: &IndexedTokens, offset: IamFetchOffset) -> bool {
        tokens.contains_slot(&self.identifier, offset.slot())
    }
}

impl Condition for IamFetchReadyCondition {
    fn condition_id(&self) -> &str {
        Self::CONDITION_ID
    }

    fn is_met(&self, tokens: &IndexedTokens) -> bool {
        if self.has(tokens, IamFetchOffset::UserCreate) {
            return true;
        }
        let user_updated = self.has(tokens, IamFetchOffset::UserUpdate);
        if self.subscription_update_pending() {
            user_updated && self.has(tokens, IamFetchOffset::SubscriptionUpdate)
        } else {
            user_updated
        }
    }

    fn newest_token(&self, tokens: &IndexedTokens) -> Option<ReadYourWriteToken> {
        tokens.newest_token(&self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> ReadYourWriteToken {
        ReadYourWriteToken::with_token(s, 0)
    }

    #[test]
    fn token_present_ignores_empty_tokens() {
        let condition = TokenPresentCondition::new("u1");
        let mut tokens = IndexedTokens::new();
        assert!(!condition.is_met(&tokens));

        tokens.insert("u1", 0, ReadYourWriteToken::none());
        assert!(!condition.is_met(&tokens));

        tokens.insert("u1", 1, token("abc"));
        assert!(condition.is_met(&tokens));
        assert_eq!(condition.newest_token(&tokens), Some(token("abc")));
    }

    #[test]
    fn token_present_is_per_identifier() {
        let condition = TokenPresentCondition::new("u1");
        let mut tokens = IndexedTokens::new();
        tokens.insert("u2", 0, token("abc"));
        assert!(!condition.is_met(&tokens));
        assert_eq!(condition.newest_token(&tokens), None);
    }

    #[test]
    fn slots_recorded_needs_every_slot() {
        let condition = SlotsRecordedCondition::new("u1", [0, 2]);
        let mut tokens = IndexedTokens::new();
        tokens.insert("u1", 0, token("a"));
        assert!(!condition.is_met(&tokens));
        tokens.insert("u1", 2, ReadYourWriteToken::none());
        assert!(condition.is_met(&tokens));
    }

    #[test]
    fn iam_user_create_is_enough() {
        let condition = IamFetchReadyCondition::new("u1").with_subscription_update_pending(true);
        let mut tokens = IndexedTokens::new();
        tokens.insert("u1", IamFetchOffset::UserCreate.slot(), token("001"));
        assert!(condition.is_met(&tokens));
    }

    #[test]
    fn iam_user_update_waits_for_pending_subscription() {
        let condition = IamFetchReadyCondition::new("u1");
        let mut tokens = IndexedTokens::new();
        tokens.insert("u1", IamFetchOffset::UserUpdate.slot(), token("001"));
        assert!(condition.is_met(&tokens));

        let condition = condition.with_subscription_update_pending(true);
        assert!(condition.subscription_update_pending());
        assert!(!condition.is_met(&tokens));

        tokens.insert("u1", IamFetchOffset::SubscriptionUpdate.slot(), token("002"));
        assert!(condition.is_met(&tokens));
        assert_eq!(condition.newest_token(&tokens), Some(token("002")));
    }

    #[test]
    fn offsets_map_to_fixed_slots() {
        assert_eq!(IamFetchOffset::UserCreate.slot(), 0);
        assert_eq!(IamFetchOffset::UserUpdate.slot(), 1);
        assert_eq!(IamFetchOffset::SubscriptionUpdate.slot(), 2);
    }
}
