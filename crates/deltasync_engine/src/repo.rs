//! The operation repository: durable delta queue and executor dispatch.

use crate::background::{BackgroundGrant, BackgroundTaskManager};
use crate::config::RepoConfig;
use crate::error::SyncResult;
use crate::executor::DeltaExecutor;
use deltasync_protocol::{Delta, DeltaId, DeltaQueue};
use deltasync_storage::{EntryKey, QueueJournal, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Statistics of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// The call found another flush running and did nothing.
    pub coalesced: bool,
    /// Number of dispatch rounds.
    pub rounds: usize,
    /// Number of executor calls.
    pub batches: usize,
    /// Deltas handed to executors.
    pub dispatched: usize,
    /// Deltas acknowledged and removed.
    pub acknowledged: usize,
    /// Deltas rejected permanently and removed.
    pub dropped: usize,
    /// Executor calls that returned an error.
    pub failed_batches: usize,
    /// Deltas left queued because no executor serves their model type.
    pub unroutable: usize,
    /// Background time expired while the flush was running.
    pub background_expired: bool,
    /// Deltas still queued when the flush finished.
    pub remaining: usize,
}

impl FlushReport {
    /// Report of a coalesced flush request.
    pub fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }
}

struct RepoState {
    queue: DeltaQueue,
    journal: QueueJournal,
    /// The journal no longer mirrors the queue and must be rewritten.
    journal_dirty: bool,
}

impl RepoState {
    /// Rewrites the journal to the current queue contents.
    fn rewrite_journal(&mut self) -> SyncResult<()> {
        let mut live = Vec::with_capacity(self.queue.len());
        for delta in self.queue.pending() {
            live.push((entry_key(&delta.delta_id), delta.encode()?));
        }
        self.journal
            .compact(live.iter().map(|(key, payload)| (*key, payload.as_slice())))?;
        self.journal_dirty = false;
        Ok(())
    }

    fn persist_append(
        &mut self,
        key: &EntryKey,
        payload: &[u8],
        collapsed: Option<&Delta>,
    ) -> SyncResult<()> {
        if self.journal_dirty {
            return self.rewrite_journal();
        }
        self.journal.append(key, payload)?;
        if let Some(collapsed) = collapsed {
            self.journal.remove([&entry_key(&collapsed.delta_id)])?;
        }
        Ok(())
    }

    fn persist_remove(&mut self, keys: &[EntryKey]) -> SyncResult<()> {
        if self.journal_dirty {
            return self.rewrite_journal();
        }
        self.journal.remove(keys)?;
        Ok(())
    }
}

#[derive(Default)]
struct Routes {
    executors: Vec<Arc<dyn DeltaExecutor>>,
    by_model_type: HashMap<String, usize>,
}

struct Batch {
    executor: Arc<dyn DeltaExecutor>,
    deltas: Vec<Delta>,
}

/// Clears the flushing flag when a flush ends, including by panic.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable queue of deltas and the dispatcher that drains it.
///
/// Deltas are journaled on enqueue and removed once an executor
/// acknowledges or drops them. Deltas for the same identifier are always
/// handed to executors in enqueue order: a delta is held back while an
/// earlier delta for its identifier is in another executor's batch, and
/// an identifier is blocked for the rest of a flush once one of its deltas
/// is not acknowledged.
///
/// # Example
///
/// ```rust
/// use deltasync_engine::{BackgroundTaskManager, MockExecutor, OperationRepo, RepoConfig};
/// use deltasync_protocol::Delta;
/// use deltasync_storage::InMemoryBackend;
/// use std::sync::Arc;
///
/// let repo = OperationRepo::open(
///     RepoConfig::default(),
///     Box::new(InMemoryBackend::new()),
///     Arc::new(BackgroundTaskManager::disabled()),
/// )
/// .unwrap();
/// let executor = Arc::new(MockExecutor::new("users", &["User"]));
/// repo.register_executor(executor.clone());
///
/// repo.enqueue(Delta::new("user-1", "User", "name", "Ada")).unwrap();
/// let report = repo.flush(false).unwrap();
/// assert_eq!(report.acknowledged, 1);
/// assert_eq!(repo.pending_count(), 0);
/// ```
pub struct OperationRepo {
    config: RepoConfig,
    state: Mutex<RepoState>,
    routes: RwLock<Routes>,
    background: Arc<BackgroundTaskManager>,
    flushing: AtomicBool,
    paused: AtomicBool,
}

impl OperationRepo {
    /// Opens the repository, restoring deltas persisted by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or repaired.
    pub fn open(
        config: RepoConfig,
        backend: Box<dyn StorageBackend>,
        background: Arc<BackgroundTaskManager>,
    ) -> SyncResult<Self> {
        let (journal, replayed) = QueueJournal::open(backend, config.sync_on_write)?;

        let mut deltas = Vec::with_capacity(replayed.entries.len());
        let mut skipped = 0usize;
        for entry in replayed.entries {
            match Delta::decode(&entry.payload) {
                Ok(delta) => deltas.push(delta),
                Err(err) => {
                    warn!(key = %Uuid::from_bytes(entry.key), error = %err, "skipping undecodable journal entry");
                    skipped += 1;
                }
            }
        }

        let queue = DeltaQueue::restore(deltas);
        if !queue.is_empty() {
            info!(
                count = queue.len(),
                next_sequence = queue.next_sequence(),
                "restored pending deltas"
            );
        }

        Ok(Self {
            config,
            state: Mutex::new(RepoState {
                queue,
                journal,
                journal_dirty: skipped > 0,
            }),
            routes: RwLock::new(Routes::default()),
            background,
            flushing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Returns the background task manager used for background flushes.
    pub fn background(&self) -> &Arc<BackgroundTaskManager> {
        &self.background
    }

    /// Routes every model type the executor supports to it.
    ///
    /// A later registration for the same model type replaces the earlier
    /// route.
    pub fn register_executor(&self, executor: Arc<dyn DeltaExecutor>) {
        let mut routes = self.routes.write();
        let index = routes.executors.len();
        for model_type in executor.supported_model_types() {
            if let Some(previous) = routes.by_model_type.insert(model_type.clone(), index) {
                warn!(
                    model_type = %model_type,
                    previous = routes.executors[previous].name(),
                    executor = executor.name(),
                    "replacing executor route"
                );
            }
        }
        debug!(executor = executor.name(), "registered executor");
        routes.executors.push(executor);
    }

    /// Name of the executor serving a model type.
    pub fn executor_for(&self, model_type: &str) -> Option<String> {
        let routes = self.routes.read();
        routes
            .by_model_type
            .get(model_type)
            .map(|&i| routes.executors[i].name().to_string())
    }

    /// Appends a delta to the queue and the journal.
    ///
    /// Returns the assigned sequence. A journal write failure is logged and
    /// repaired by a full rewrite on the next enqueue or flush; the delta
    /// stays queued in memory either way.
    ///
    /// # Errors
    ///
    /// Returns an error only if the delta cannot be encoded.
    pub fn enqueue(&self, mut delta: Delta) -> SyncResult<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Encode before queueing so a codec failure leaves the queue untouched.
        delta.sequence = state.queue.next_sequence();
        let payload = delta.encode()?;
        let key = entry_key(&delta.delta_id);

        let identifier = delta.identifier.clone();
        let (sequence, collapsed) = if self.config.collapse_duplicates {
            state.queue.push_collapsing(delta)
        } else {
            (state.queue.push(delta), None)
        };

        if let Some(collapsed) = &collapsed {
            debug!(
                identifier = %identifier,
                collapsed_sequence = collapsed.sequence,
                "collapsed duplicate delta"
            );
        }
        if let Err(err) = state.persist_append(&key, &payload, collapsed.as_ref()) {
            warn!(identifier = %identifier, sequence, error = %err, "failed to journal delta");
            state.journal_dirty = true;
        }

        debug!(identifier = %identifier, sequence, "enqueued delta");
        Ok(sequence)
    }

    /// Flushes pending deltas to their executors.
    ///
    /// Returns immediately with [`FlushReport::coalesced`] if another flush
    /// is running, and with an empty report while paused. A background
    /// flush holds a [`BackgroundGrant`] until it returns.
    ///
    /// # Errors
    ///
    /// Executor and journal failures are logged and do not fail the flush.
    /// A retryable executor error leaves its batch queued; a non-retryable
    /// one drops the batch like a permanent rejection.
    pub fn flush(&self, in_background: bool) -> SyncResult<FlushReport> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("flush already running, request coalesced");
            return Ok(FlushReport::coalesced());
        }
        let _flushing = FlushGuard(&self.flushing);

        if self.is_paused() {
            debug!("operation repo paused, skipping flush");
            return Ok(FlushReport::default());
        }

        let grant = (in_background && self.background.is_enabled())
            .then(|| self.background.begin(self.background.next_task_id()));

        let snapshot = self.state.lock().queue.snapshot();
        let mut report = FlushReport::default();
        if !snapshot.is_empty() {
            self.dispatch(snapshot, grant.as_ref(), &mut report);
        }

        let mut state = self.state.lock();
        if state.journal_dirty || state.journal.record_count() > self.config.compact_threshold {
            if let Err(err) = state.rewrite_journal() {
                warn!(error = %err, "journal compaction failed");
                state.journal_dirty = true;
            }
        }
        report.remaining = state.queue.len();
        drop(state);

        if report.dispatched > 0 {
            info!(
                dispatched = report.dispatched,
                acknowledged = report.acknowledged,
                dropped = report.dropped,
                remaining = report.remaining,
                "flush complete"
            );
        }
        Ok(report)
    }

    fn dispatch(&self, snapshot: Vec<Delta>, grant: Option<&BackgroundGrant>, report: &mut FlushReport) {
        let (executors, by_model_type) = {
            let routes = self.routes.read();
            (routes.executors.clone(), routes.by_model_type.clone())
        };
        let max_batch = self.config.max_batch_size.max(1);

        let mut blocked: HashSet<String> = HashSet::new();
        let mut unroutable_types: HashSet<String> = HashSet::new();
        let mut pending = snapshot;

        while !pending.is_empty() {
            report.rounds += 1;

            let mut batches: Vec<Batch> = Vec::new();
            let mut batch_of_executor: HashMap<usize, usize> = HashMap::new();
            let mut owner: HashMap<String, usize> = HashMap::new();
            let mut deferred: HashSet<String> = HashSet::new();
            let mut next_round = Vec::new();

            for delta in pending {
                if blocked.contains(&delta.identifier) {
                    continue;
                }
                let Some(&executor) = by_model_type.get(&delta.model_type) else {
                    if unroutable_types.insert(delta.model_type.clone()) {
                        warn!(model_type = %delta.model_type, "no executor for model type, deltas stay queued");
                    }
                    report.unroutable += 1;
                    blocked.insert(delta.identifier.clone());
                    continue;
                };

                let held_elsewhere = owner
                    .get(&delta.identifier)
                    .is_some_and(|&other| other != executor);
                let batch = batch_of_executor.get(&executor).copied();
                let full = batch.is_some_and(|b| batches[b].deltas.len() >= max_batch);
                if held_elsewhere || full || deferred.contains(&delta.identifier) {
                    deferred.insert(delta.identifier.clone());
                    next_round.push(delta);
                    continue;
                }

                let batch = batch.unwrap_or_else(|| {
                    batches.push(Batch {
                        executor: Arc::clone(&executors[executor]),
                        deltas: Vec::new(),
                    });
                    batch_of_executor.insert(executor, batches.len() - 1);
                    batches.len() - 1
                });
                owner.insert(delta.identifier.clone(), executor);
                batches[batch].deltas.push(delta);
            }

            for batch in batches {
                if grant.is_some_and(BackgroundGrant::is_expired) && !report.background_expired {
                    info!("background time expired, continuing flush in foreground");
                    report.background_expired = true;
                }
                self.execute_batch(batch, &mut blocked, report);
            }

            pending = next_round;
        }
    }

    fn execute_batch(&self, batch: Batch, blocked: &mut HashSet<String>, report: &mut FlushReport) {
        let name = batch.executor.name().to_string();
        report.batches += 1;
        report.dispatched += batch.deltas.len();
        debug!(executor = %name, count = batch.deltas.len(), "executing batch");

        let outcome = match batch.executor.execute(&batch.deltas) {
            Ok(outcome) => outcome,
            Err(err) if !err.is_retryable() => {
                warn!(executor = %name, count = batch.deltas.len(), error = %err, "executor rejected batch, dropping deltas");
                report.failed_batches += 1;
                report.dropped += batch.deltas.len();
                let rejected: HashSet<DeltaId> = batch.deltas.iter().map(|d| d.delta_id).collect();
                self.remove_resolved(&rejected);
                return;
            }
            Err(err) => {
                warn!(executor = %name, count = batch.deltas.len(), error = %err, "executor failed, batch stays queued");
                report.failed_batches += 1;
                blocked.extend(batch.deltas.into_iter().map(|d| d.identifier));
                return;
            }
        };

        let in_batch: HashSet<DeltaId> = batch.deltas.iter().map(|d| d.delta_id).collect();
        let acknowledged: HashSet<DeltaId> = outcome
            .acknowledged
            .into_iter()
            .filter(|id| in_batch.contains(id))
            .collect();
        let dropped: HashSet<DeltaId> = outcome
            .dropped
            .into_iter()
            .filter(|id| in_batch.contains(id) && !acknowledged.contains(id))
            .collect();

        if !dropped.is_empty() {
            warn!(executor = %name, count = dropped.len(), "executor dropped deltas");
        }
        report.acknowledged += acknowledged.len();
        report.dropped += dropped.len();

        for delta in &batch.deltas {
            if !acknowledged.contains(&delta.delta_id) && !dropped.contains(&delta.delta_id) {
                blocked.insert(delta.identifier.clone());
            }
        }

        let resolved: HashSet<DeltaId> = acknowledged.union(&dropped).copied().collect();
        self.remove_resolved(&resolved);
    }

    fn remove_resolved(&self, resolved: &HashSet<DeltaId>) {
        if resolved.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let keys: Vec<EntryKey> = resolved
            .iter()
            .filter(|id| state.queue.contains(id))
            .map(entry_key)
            .collect();
        state.queue.remove(resolved);

        if let Err(err) = state.persist_remove(&keys) {
            warn!(count = keys.len(), error = %err, "failed to journal removal");
            state.journal_dirty = true;
        }
    }

    /// Stops flushing until [`OperationRepo::resume`]. Enqueue still works.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("operation repo paused");
        }
    }

    /// Resumes flushing.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("operation repo resumed");
        }
    }

    /// Returns true while paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Returns true while a flush is running.
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Number of queued deltas.
    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Copies the queued deltas in enqueue order.
    pub fn pending_deltas(&self) -> Vec<Delta> {
        self.state.lock().queue.snapshot()
    }

    /// Number of journal records written since the last compaction.
    pub fn journal_records(&self) -> usize {
        self.state.lock().journal.record_count()
    }

    /// Flushes every `poll_interval` on the blocking pool.
    ///
    /// The task holds only a weak reference and stops once the repository
    /// is dropped. Must be called within a tokio runtime.
    pub fn start_polling(self: &Arc<Self>) -> JoinHandle<()> {
        let repo: Weak<Self> = Arc::downgrade(self);
        let period = self.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(repo) = repo.upgrade() else {
                    debug!("operation repo dropped, polling stopped");
                    break;
                };
                match tokio::task::spawn_blocking(move || repo.flush(false)).await {
                    Ok(Ok(report)) if report.dispatched > 0 => {
                        debug!(dispatched = report.dispatched, "poll flush finished");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => warn!(error = %err, "poll flush failed"),
                    Err(err) => warn!(error = %err, "poll flush task failed"),
                }
            }
        })
    }
}

fn entry_key(id: &DeltaId) -> EntryKey {
    *id.as_bytes()
}
