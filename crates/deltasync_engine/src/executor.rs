//! Executor contract for delivering deltas.

use crate::error::{SyncError, SyncResult};
use deltasync_protocol::{Delta, DeltaId};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Delivers batches of deltas to a remote backend.
///
/// The repository routes a delta to the executor whose
/// [`supported_model_types`](DeltaExecutor::supported_model_types) contains
/// its `model_type`. Batches arrive in enqueue order and never mix one
/// identifier across two executors in the same round.
pub trait DeltaExecutor: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Model types this executor handles.
    fn supported_model_types(&self) -> Vec<String>;

    /// Delivers a batch.
    ///
    /// Returning `Ok` with a partial report keeps every delta that is
    /// neither acknowledged nor dropped queued for a later flush. Returning
    /// `Err` keeps the whole batch.
    fn execute(&self, batch: &[Delta]) -> SyncResult<ExecutionReport>;
}

/// Outcome of one executor call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Deltas accepted by the backend.
    pub acknowledged: Vec<DeltaId>,
    /// Deltas rejected permanently; removed without retry.
    pub dropped: Vec<DeltaId>,
}

impl ExecutionReport {
    /// Acknowledges every delta in the batch.
    pub fn all(batch: &[Delta]) -> Self {
        Self {
            acknowledged: batch.iter().map(|d| d.delta_id).collect(),
            dropped: Vec::new(),
        }
    }

    /// Number of deltas resolved by this report.
    pub fn resolved(&self) -> usize {
        self.acknowledged.len() + self.dropped.len()
    }
}

/// Scripted outcome for [`MockExecutor`].
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Acknowledge the whole batch.
    AcknowledgeAll,
    /// Drop the whole batch.
    DropAll,
    /// Acknowledge only the first `n` deltas.
    AcknowledgeFirst(usize),
    /// Fail with a retryable error.
    Fail(String),
    /// Fail with a non-retryable error, rejecting the batch for good.
    Reject(String),
}

/// An executor for testing.
///
/// Records every batch it receives and answers with scripted outcomes,
/// falling back to acknowledging everything once the script runs out.
#[derive(Debug)]
pub struct MockExecutor {
    name: String,
    model_types: Vec<String>,
    script: Mutex<VecDeque<MockOutcome>>,
    batches: Mutex<Vec<Vec<Delta>>>,
}

impl MockExecutor {
    /// Creates a mock serving the given model types.
    pub fn new(name: impl Into<String>, model_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            model_types: model_types.iter().map(|t| t.to_string()).collect(),
            script: Mutex::new(VecDeque::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Queues the outcome of a future call.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Every batch received so far.
    pub fn batches(&self) -> Vec<Vec<Delta>> {
        self.batches.lock().clone()
    }

    /// Every delta received so far, flattened in call order.
    pub fn received(&self) -> Vec<Delta> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of `execute` calls.
    pub fn call_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl DeltaExecutor for MockExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_model_types(&self) -> Vec<String> {
        self.model_types.clone()
    }

    fn execute(&self, batch: &[Delta]) -> SyncResult<ExecutionReport> {
        self.batches.lock().push(batch.to_vec());
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(MockOutcome::AcknowledgeAll);

        match outcome {
            MockOutcome::AcknowledgeAll => Ok(ExecutionReport::all(batch)),
            MockOutcome::DropAll => Ok(ExecutionReport {
                acknowledged: Vec::new(),
                dropped: batch.iter().map(|d| d.delta_id).collect(),
            }),
            MockOutcome::AcknowledgeFirst(n) => Ok(ExecutionReport {
                acknowledged: batch.iter().take(n).map(|d| d.delta_id).collect(),
                dropped: Vec::new(),
            }),
            MockOutcome::Fail(message) => Err(SyncError::executor_retryable(&self.name, message)),
            MockOutcome::Reject(message) => Err(SyncError::executor_fatal(&self.name, message)),
        }
    }
}
