//! # DeltaSync Engine
//!
//! Durable delta queue and dispatch for client-side state sync.
//!
//! This crate provides:
//! - [`OperationRepo`]: journaled FIFO of deltas, flushed to executors
//! - [`DeltaExecutor`]: the contract remote delivery implements
//! - Background-execution grants for flushes started while suspended
//! - [`Model`] observers that record property changes as deltas
//!
//! ## Architecture
//!
//! Model mutations become [`Delta`](deltasync_protocol::Delta) records that
//! are journaled before `enqueue` returns. A flush walks the queue in
//! enqueue order and hands batches to the executor registered for each
//! model type. Executors report which deltas the backend accepted, and
//! usually record the returned read-your-write token in a
//! [`ConsistencyManager`](deltasync_consistency::ConsistencyManager) so that
//! dependent reads can wait for it.
//!
//! ## Key Invariants
//!
//! - Deltas for one identifier reach executors in enqueue order
//! - A delta leaves the queue only when acknowledged or dropped
//! - Queued deltas survive a restart; a torn journal tail is discarded
//! - At most one flush runs at a time; concurrent requests coalesce

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background;
mod config;
mod error;
mod executor;
mod model;
mod repo;

pub use background::{
    BackgroundGrant, BackgroundTaskHandler, BackgroundTaskManager, RecordingTaskHandler, TaskCall,
};
pub use config::RepoConfig;
pub use error::{SyncError, SyncResult};
pub use executor::{DeltaExecutor, ExecutionReport, MockExecutor, MockOutcome};
pub use model::{DeltaRecorder, Model, ModelChangeObserver, ModelChangedArgs};
pub use repo::{FlushReport, OperationRepo};
