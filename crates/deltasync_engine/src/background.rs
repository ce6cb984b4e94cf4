//! Platform background-execution integration.
//!
//! The host platform may suspend the process at any time. A flush started
//! while the app is in the background asks the platform for extra execution
//! time through a [`BackgroundTaskHandler`], and must hand that time back
//! exactly once when it finishes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Host hook for background execution time.
///
/// Implemented by the embedding platform layer. Calls are made from the
/// flushing thread; implementations must not block for long.
pub trait BackgroundTaskHandler: Send + Sync {
    /// Requests background time for the task.
    fn begin_background_task(&self, task_id: &str);

    /// Releases background time held by the task.
    fn end_background_task(&self, task_id: &str);

    /// Tells the platform the task's grant is no longer valid.
    fn set_task_invalid(&self, task_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrantState {
    Active,
    Expired,
}

#[derive(Default)]
struct Grants {
    active: HashMap<String, GrantState>,
}

/// Hands out [`BackgroundGrant`]s and routes platform expiry to them.
///
/// Without a handler every grant is a no-op, so callers never need to
/// special-case platforms that lack a background API.
pub struct BackgroundTaskManager {
    handler: Option<Arc<dyn BackgroundTaskHandler>>,
    grants: Arc<Mutex<Grants>>,
    next_id: AtomicU64,
}

impl BackgroundTaskManager {
    /// Prefix of every task id handed out for repository flushes.
    pub const FLUSH_TASK_PREFIX: &'static str = "operation_repo_flush";

    /// Creates a manager around an optional platform handler.
    pub fn new(handler: Option<Arc<dyn BackgroundTaskHandler>>) -> Self {
        Self {
            handler,
            grants: Arc::new(Mutex::new(Grants::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a manager without a platform handler.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Returns true if a platform handler is installed.
    pub fn is_enabled(&self) -> bool {
        self.handler.is_some()
    }

    /// Returns a fresh task id, unique for the lifetime of the manager.
    pub fn next_task_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", Self::FLUSH_TASK_PREFIX)
    }

    /// Begins a background task and returns its grant.
    ///
    /// The grant ends the task when dropped, unless it expired first.
    pub fn begin(&self, task_id: impl Into<String>) -> BackgroundGrant {
        let task_id = task_id.into();
        if let Some(handler) = &self.handler {
            self.grants
                .lock()
                .active
                .insert(task_id.clone(), GrantState::Active);
            handler.begin_background_task(&task_id);
            debug!(task_id = %task_id, "background task started");
        }
        BackgroundGrant {
            task_id,
            handler: self.handler.clone(),
            grants: Arc::clone(&self.grants),
        }
    }

    /// Handles the platform's expiry callback for a task.
    ///
    /// Calls `set_task_invalid` once; the grant's drop then skips `end`.
    /// Returns false for unknown or already expired tasks.
    pub fn expire(&self, task_id: &str) -> bool {
        let Some(handler) = &self.handler else {
            return false;
        };
        {
            let mut grants = self.grants.lock();
            match grants.active.get_mut(task_id) {
                Some(state) if *state == GrantState::Active => *state = GrantState::Expired,
                _ => return false,
            }
        }
        warn!(task_id, "background time expired");
        handler.set_task_invalid(task_id);
        true
    }

    /// Number of grants not yet released.
    pub fn active_grants(&self) -> usize {
        self.grants.lock().active.len()
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::disabled()
    }
}

/// An active background task. Ends the task exactly once on drop.
pub struct BackgroundGrant {
    task_id: String,
    handler: Option<Arc<dyn BackgroundTaskHandler>>,
    grants: Arc<Mutex<Grants>>,
}

impl BackgroundGrant {
    /// The task id this grant was started with.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Returns true if the platform expired this grant.
    pub fn is_expired(&self) -> bool {
        matches!(
            self.grants.lock().active.get(&self.task_id),
            Some(GrantState::Expired)
        )
    }
}

impl Drop for BackgroundGrant {
    fn drop(&mut self) {
        let Some(handler) = &self.handler else {
            return;
        };
        let state = self.grants.lock().active.remove(&self.task_id);
        if state == Some(GrantState::Active) {
            handler.end_background_task(&self.task_id);
            debug!(task_id = %self.task_id, "background task ended");
        }
    }
}

impl std::fmt::Debug for BackgroundGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundGrant")
            .field("task_id", &self.task_id)
            .field("enabled", &self.handler.is_some())
            .finish()
    }
}

/// A call observed by [`RecordingTaskHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCall {
    /// `begin_background_task`.
    Begin(String),
    /// `end_background_task`.
    End(String),
    /// `set_task_invalid`.
    Invalidate(String),
}

/// A handler that records every call, for testing.
#[derive(Debug, Default)]
pub struct RecordingTaskHandler {
    calls: Mutex<Vec<TaskCall>>,
}

impl RecordingTaskHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<TaskCall> {
        self.calls.lock().clone()
    }

    /// Number of `begin_background_task` calls.
    pub fn begin_count(&self) -> usize {
        self.count(|c| matches!(c, TaskCall::Begin(_)))
    }

    /// Number of `end_background_task` calls.
    pub fn end_count(&self) -> usize {
        self.count(|c| matches!(c, TaskCall::End(_)))
    }

    /// Number of `set_task_invalid` calls.
    pub fn invalidate_count(&self) -> usize {
        self.count(|c| matches!(c, TaskCall::Invalidate(_)))
    }

    fn count(&self, pred: impl Fn(&TaskCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

impl BackgroundTaskHandler for RecordingTaskHandler {
    fn begin_background_task(&self, task_id: &str) {
        self.calls.lock().push(TaskCall::Begin(task_id.to_string()));
    }

    fn end_background_task(&self, task_id: &str) {
        self.calls.lock().push(TaskCall::End(task_id.to_string()));
    }

    fn set_task_invalid(&self, task_id: &str) {
        self.calls
            .lock()
            .push(TaskCall::Invalidate(task_id.to_string()));
    }
}
