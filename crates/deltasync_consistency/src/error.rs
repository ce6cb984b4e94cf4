//! Error types for consistency waits.

use std::time::Duration;
use thiserror::Error;

/// Result type for consistency operations.
pub type ConsistencyResult<T> = Result<T, ConsistencyError>;

/// Errors surfaced to callers waiting on a condition.
///
/// None of these are internal faults: they describe a wait that ended
/// without the condition being met.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// The condition was not met within the caller's bound.
    #[error("condition {condition_id} for {identifier} not met within {bound:?}")]
    Timeout {
        /// Condition that was awaited.
        condition_id: String,
        /// Identifier the wait was registered for.
        identifier: String,
        /// Caller-imposed bound.
        bound: Duration,
    },

    /// The waiter was dropped by the manager without a resolution.
    #[error("wait for {identifier} was cancelled")]
    Cancelled {
        /// Identifier the wait was registered for.
        identifier: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConsistencyError::Timeout {
            condition_id: "IamFetchReadyCondition".into(),
            identifier: "u1".into(),
            bound: Duration::from_millis(250),
        };
        let text = err.to_string();
        assert!(text.contains("IamFetchReadyCondition"));
        assert!(text.contains("u1"));
        assert!(text.contains("250ms"));
    }
}
