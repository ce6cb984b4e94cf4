//! # DeltaSync Protocol
//!
//! Local contract types for DeltaSync.
//!
//! This crate provides:
//! - `Value` for model property values
//! - `Delta` for recorded model mutations, with CBOR codecs
//! - `DeltaQueue` for ordered pending deltas
//! - `ReadYourWriteToken` and `IndexedTokens` for read-your-write consistency
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod delta;
mod error;
mod queue;
mod token;
mod value;

pub use delta::{Delta, DeltaId};
pub use error::{CodecError, CodecResult};
pub use queue::DeltaQueue;
pub use token::{IndexedTokens, ReadYourWriteToken, Slot};
pub use value::Value;
