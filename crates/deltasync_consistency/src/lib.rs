//! # DeltaSync Consistency
//!
//! Read-your-write coordination between the delta pipeline and dependent
//! reads.
//!
//! Executors record the [`ReadYourWriteToken`](deltasync_protocol::ReadYourWriteToken)
//! returned by the backend into a [`ConsistencyManager`]. Readers register a
//! [`Condition`] and suspend until enough tokens have been recorded for their
//! identifier, then present the newest one with their request.
//!
//! ```rust
//! use deltasync_consistency::{ConsistencyManager, TokenPresentCondition};
//! use deltasync_protocol::ReadYourWriteToken;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let manager = ConsistencyManager::new();
//! manager.record_token("user-1", 0, ReadYourWriteToken::with_token("1700", 0));
//!
//! let token = manager
//!     .await_condition(Arc::new(TokenPresentCondition::new("user-1")), "user-1")
//!     .await;
//! assert_eq!(token.and_then(|t| t.token).as_deref(), Some("1700"));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod condition;
mod error;
mod manager;

pub use condition::{
    Condition, IamFetchOffset, IamFetchReadyCondition, SlotsRecordedCondition,
    TokenPresentCondition,
};
pub use error::{ConsistencyError, ConsistencyResult};
pub use manager::{ConsistencyManager, Resolution, WaiterState};
