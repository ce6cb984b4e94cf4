//! Integration tests for the operation repo, background grants and
//! read-your-write waits.

use deltasync_consistency::{
    ConsistencyManager, IamFetchOffset, IamFetchReadyCondition, TokenPresentCondition,
};
use deltasync_engine::{
    BackgroundTaskManager, DeltaExecutor, DeltaRecorder, ExecutionReport, MockExecutor,
    MockOutcome, Model, OperationRepo, RecordingTaskHandler, RepoConfig, SyncResult, TaskCall,
};
use deltasync_protocol::{Delta, ReadYourWriteToken};
use deltasync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use proptest::prelude::*;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn open_repo(backend: Box<dyn StorageBackend>) -> OperationRepo {
    OperationRepo::open(
        RepoConfig::default(),
        backend,
        Arc::new(BackgroundTaskManager::disabled()),
    )
    .unwrap()
}

fn memory_repo() -> OperationRepo {
    open_repo(Box::new(InMemoryBackend::new()))
}

fn file_repo(path: &Path) -> OperationRepo {
    open_repo(Box::new(FileBackend::open(path).unwrap()))
}

#[test]
fn same_identifier_deltas_arrive_in_enqueue_order() {
    let repo = memory_repo();
    let executor = Arc::new(MockExecutor::new("users", &["User"]));
    repo.register_executor(executor.clone());

    let d1 = Delta::new("u1", "User", "tag", "first");
    let d2 = Delta::new("u1", "User", "tag", "second");
    let (id1, id2) = (d1.delta_id, d2.delta_id);
    assert_eq!(repo.enqueue(d1).unwrap(), 1);
    assert_eq!(repo.enqueue(d2).unwrap(), 2);

    let report = repo.flush(false).unwrap();
    assert_eq!(report.acknowledged, 2);

    let seen: Vec<_> = executor.received().iter().map(|d| d.delta_id).collect();
    assert_eq!(seen, vec![id1, id2]);
    assert_eq!(repo.pending_count(), 0);
}

#[test]
fn failed_batch_stays_queued_and_blocks_its_identifier() {
    let repo = memory_repo();
    let users = Arc::new(MockExecutor::new("users", &["User"]));
    let subs = Arc::new(MockExecutor::new("subs", &["Subscription"]));
    users.push_outcome(MockOutcome::Fail("503".into()));
    repo.register_executor(users.clone());
    repo.register_executor(subs.clone());

    repo.enqueue(Delta::new("u1", "User", "name", "ada")).unwrap();
    repo.enqueue(Delta::new("u1", "Subscription", "token", "t1")).unwrap();
    repo.enqueue(Delta::new("u2", "Subscription", "token", "t2")).unwrap();

    let report = repo.flush(false).unwrap();
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.acknowledged, 1);
    assert_eq!(report.remaining, 2);

    // The u1 subscription delta must not overtake the failed user delta.
    let delivered: Vec<_> = subs.received().into_iter().map(|d| d.identifier).collect();
    assert_eq!(delivered, vec!["u2"]);

    let report = repo.flush(false).unwrap();
    assert_eq!(report.acknowledged, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(subs.received().last().unwrap().identifier, "u1");
}

#[test]
fn dropped_deltas_are_removed() {
    let repo = memory_repo();
    let users = Arc::new(MockExecutor::new("users", &["User"]));
    users.push_outcome(MockOutcome::DropAll);
    repo.register_executor(users.clone());

    repo.enqueue(Delta::new("u1", "User", "email", "not-an-email")).unwrap();
    let report = repo.flush(false).unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(repo.pending_count(), 0);
}

#[test]
fn background_flush_begins_and_ends_once_even_on_failure() {
    let handler = Arc::new(RecordingTaskHandler::new());
    let background = Arc::new(BackgroundTaskManager::new(Some(handler.clone())));
    let repo = OperationRepo::open(
        RepoConfig::default(),
        Box::new(InMemoryBackend::new()),
        background,
    )
    .unwrap();

    let users = Arc::new(MockExecutor::new("users", &["User"]));
    users.push_outcome(MockOutcome::Fail("timeout".into()));
    repo.register_executor(users.clone());
    repo.enqueue(Delta::new("u1", "User", "name", "ada")).unwrap();

    let report = repo.flush(true).unwrap();
    assert_eq!(report.failed_batches, 1);
    assert_eq!(handler.begin_count(), 1);
    assert_eq!(handler.end_count(), 1);
    assert_eq!(handler.invalidate_count(), 0);

    let calls = handler.calls();
    let TaskCall::Begin(task_id) = &calls[0] else {
        panic!("expected begin first, got {calls:?}");
    };
    assert!(task_id.starts_with("operation_repo_flush-"));
    assert_eq!(calls[1], TaskCall::End(task_id.clone()));

    // A foreground flush never touches the background API.
    repo.flush(false).unwrap();
    assert_eq!(handler.begin_count(), 1);
}

/// Expires the running background task from inside the flush.
struct ExpiringExecutor {
    background: Arc<BackgroundTaskManager>,
    handler: Arc<RecordingTaskHandler>,
}

impl DeltaExecutor for ExpiringExecutor {
    fn name(&self) -> &str {
        "expiring"
    }

    fn supported_model_types(&self) -> Vec<String> {
        vec!["User".into()]
    }

    fn execute(&self, batch: &[Delta]) -> SyncResult<ExecutionReport> {
        for call in self.handler.calls() {
            if let TaskCall::Begin(task_id) = call {
                self.background.expire(&task_id);
            }
        }
        Ok(ExecutionReport::all(batch))
    }
}

#[test]
fn expired_background_flush_completes_in_foreground() {
    let handler = Arc::new(RecordingTaskHandler::new());
    let background = Arc::new(BackgroundTaskManager::new(Some(handler.clone())));
    let repo = OperationRepo::open(
        RepoConfig::new().with_max_batch_size(1),
        Box::new(InMemoryBackend::new()),
        Arc::clone(&background),
    )
    .unwrap();
    repo.register_executor(Arc::new(ExpiringExecutor {
        background: Arc::clone(&background),
        handler: handler.clone(),
    }));

    // One delta per batch, so a second batch runs after the grant expires.
    repo.enqueue(Delta::new("u1", "User", "a", 1)).unwrap();
    repo.enqueue(Delta::new("u2", "User", "b", 2)).unwrap();

    let report = repo.flush(true).unwrap();
    assert_eq!(report.acknowledged, 2);
    assert_eq!(report.batches, 2);
    assert!(report.background_expired);
    assert_eq!(handler.begin_count(), 1);
    assert_eq!(handler.invalidate_count(), 1);
    assert_eq!(handler.end_count(), 0);
    assert_eq!(background.active_grants(), 0);
}

/// Blocks inside `execute` until released, recording each batch.
struct GatedExecutor {
    started: mpsc::Sender<()>,
    release: std::sync::Mutex<mpsc::Receiver<()>>,
    batches: std::sync::Mutex<Vec<Vec<Delta>>>,
}

impl GatedExecutor {
    fn new() -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let executor = Arc::new(Self {
            started: started_tx,
            release: std::sync::Mutex::new(release_rx),
            batches: std::sync::Mutex::new(Vec::new()),
        });
        (executor, started_rx, release_tx)
    }

    fn batches(&self) -> Vec<Vec<Delta>> {
        self.batches.lock().unwrap().clone()
    }
}

impl DeltaExecutor for GatedExecutor {
    fn name(&self) -> &str {
        "gated"
    }

    fn supported_model_types(&self) -> Vec<String> {
        vec!["User".into()]
    }

    fn execute(&self, batch: &[Delta]) -> SyncResult<ExecutionReport> {
        self.batches.lock().unwrap().push(batch.to_vec());
        self.started.send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(ExecutionReport::all(batch))
    }
}

#[test]
fn concurrent_flush_is_coalesced() {
    let (gated, started_rx, release_tx) = GatedExecutor::new();
    let repo = Arc::new(memory_repo());
    repo.register_executor(gated);
    repo.enqueue(Delta::new("u1", "User", "a", 1)).unwrap();

    let flusher = {
        let repo = Arc::clone(&repo);
        std::thread::spawn(move || repo.flush(false).unwrap())
    };
    started_rx.recv().unwrap();
    assert!(repo.is_flushing());
    let second = repo.flush(false).unwrap();
    assert!(second.coalesced);
    assert_eq!(second.dispatched, 0);

    release_tx.send(()).unwrap();
    let first = flusher.join().unwrap();
    assert!(!first.coalesced);
    assert_eq!(first.acknowledged, 1);
    assert!(!repo.is_flushing());
}

#[test]
fn delta_enqueued_mid_flush_waits_for_next_flush() {
    let (gated, started_rx, release_tx) = GatedExecutor::new();
    let repo = Arc::new(memory_repo());
    repo.register_executor(gated.clone());
    repo.enqueue(Delta::new("u1", "User", "a", 1)).unwrap();

    let flusher = {
        let repo = Arc::clone(&repo);
        std::thread::spawn(move || repo.flush(false).unwrap())
    };
    started_rx.recv().unwrap();

    // Enqueue must not wait for the executor.
    assert_eq!(repo.enqueue(Delta::new("u1", "User", "b", 2)).unwrap(), 2);
    assert_eq!(repo.pending_count(), 2);

    release_tx.send(()).unwrap();
    let first = flusher.join().unwrap();
    assert_eq!(first.dispatched, 1);
    assert_eq!(first.remaining, 1);

    release_tx.send(()).unwrap();
    let second = repo.flush(false).unwrap();
    assert_eq!(second.acknowledged, 1);
    assert_eq!(second.remaining, 0);

    let props: Vec<Vec<String>> = gated
        .batches()
        .into_iter()
        .map(|batch| batch.into_iter().map(|d| d.property).collect())
        .collect();
    assert_eq!(props, vec![vec!["a".to_string()], vec!["b".to_string()]]);
}

#[test]
fn enqueue_from_many_threads() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let repo = memory_repo();
    let users = Arc::new(MockExecutor::new("users", &["User"]));
    repo.register_executor(users.clone());

    let mut sequences: Vec<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let repo = &repo;
                scope.spawn(move || {
                    (0..PER_THREAD)
                        .map(|i| {
                            let delta =
                                Delta::new(format!("u{}", t % 4), "User", format!("t{t}"), i as i64);
                            repo.enqueue(delta).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    sequences.sort_unstable();
    let expected: Vec<u64> = (1..=(THREADS * PER_THREAD) as u64).collect();
    assert_eq!(sequences, expected);

    let queued: Vec<u64> = repo.pending_deltas().iter().map(|d| d.sequence).collect();
    assert!(queued.windows(2).all(|w| w[0] < w[1]));

    let report = repo.flush(false).unwrap();
    assert_eq!(report.acknowledged, THREADS * PER_THREAD);

    // Per identifier, deltas arrive in sequence order, and each writer's
    // values arrive in the order it wrote them.
    let received = users.received();
    for identifier in ["u0", "u1", "u2", "u3"] {
        let seen: Vec<u64> = received
            .iter()
            .filter(|d| d.identifier == identifier)
            .map(|d| d.sequence)
            .collect();
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{identifier}: {seen:?}");
    }
    for t in 0..THREADS {
        let property = format!("t{t}");
        let values: Vec<_> = received
            .iter()
            .filter(|d| d.property == property)
            .map(|d| d.value.clone())
            .collect();
        let expected: Vec<_> = (0..PER_THREAD as i64).map(deltasync_protocol::Value::from).collect();
        assert_eq!(values, expected);
    }
}

/// Acknowledges at most `limit` deltas per batch, logging the
/// acknowledged sequences into a log shared between executors.
struct LimitedExecutor {
    name: &'static str,
    model_type: &'static str,
    limit: usize,
    log: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl DeltaExecutor for LimitedExecutor {
    fn name(&self) -> &str {
        self.name
    }

    fn supported_model_types(&self) -> Vec<String> {
        vec![self.model_type.into()]
    }

    fn execute(&self, batch: &[Delta]) -> SyncResult<ExecutionReport> {
        let accepted = &batch[..batch.len().min(self.limit)];
        self.log
            .lock()
            .unwrap()
            .extend(accepted.iter().map(|d| d.sequence));
        Ok(ExecutionReport::all(accepted))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn one_identifier_is_delivered_in_enqueue_order(
        kinds in proptest::collection::vec(any::<bool>(), 1..40),
        max_batch in 1usize..6,
        user_limit in 1usize..4,
        sub_limit in 1usize..4,
    ) {
        let repo = OperationRepo::open(
            RepoConfig::new().with_max_batch_size(max_batch),
            Box::new(InMemoryBackend::new()),
            Arc::new(BackgroundTaskManager::disabled()),
        )
        .unwrap();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        repo.register_executor(Arc::new(LimitedExecutor {
            name: "users",
            model_type: "User",
            limit: user_limit,
            log: Arc::clone(&log),
        }));
        repo.register_executor(Arc::new(LimitedExecutor {
            name: "subs",
            model_type: "Subscription",
            limit: sub_limit,
            log: Arc::clone(&log),
        }));

        for (i, is_user) in kinds.iter().enumerate() {
            let model_type = if *is_user { "User" } else { "Subscription" };
            repo.enqueue(Delta::new("u1", model_type, "p", i as i64)).unwrap();
        }

        // Each flush acknowledges at least one delta.
        for _ in 0..kinds.len() {
            if repo.pending_count() == 0 {
                break;
            }
            repo.flush(false).unwrap();
        }

        prop_assert_eq!(repo.pending_count(), 0);
        let expected: Vec<u64> = (1..=kinds.len() as u64).collect();
        prop_assert_eq!(log.lock().unwrap().clone(), expected);
    }
}

#[test]
fn queue_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.journal");

    let expected = {
        let repo = file_repo(&path);
        let users = Arc::new(MockExecutor::new("users", &["User"]));
        users.push_outcome(MockOutcome::AcknowledgeFirst(1));
        repo.register_executor(users);

        for i in 0..4 {
            repo.enqueue(Delta::new("u1", "User", format!("p{i}"), i)).unwrap();
        }
        repo.flush(false).unwrap();
        repo.pending_deltas()
    };
    assert_eq!(expected.len(), 3);

    let repo = file_repo(&path);
    assert_eq!(repo.pending_deltas(), expected);
    assert_eq!(repo.enqueue(Delta::new("u1", "User", "p4", 4)).unwrap(), 5);
}

#[test]
fn torn_journal_tail_is_discarded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.journal");

    {
        let repo = file_repo(&path);
        repo.enqueue(Delta::new("u1", "User", "a", 1)).unwrap();
        repo.enqueue(Delta::new("u1", "User", "b", 2)).unwrap();
    }

    // Simulate a crash mid-write.
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"DSQJ\x01\x00\x01\xff\xff").unwrap();
    drop(file);

    let repo = file_repo(&path);
    let props: Vec<_> = repo.pending_deltas().into_iter().map(|d| d.property).collect();
    assert_eq!(props, vec!["a", "b"]);

    repo.enqueue(Delta::new("u1", "User", "c", 3)).unwrap();
    drop(repo);
    assert_eq!(file_repo(&path).pending_count(), 3);
}

/// Records a read-your-write token for each acknowledged delta.
struct TokenExecutor {
    consistency: Arc<ConsistencyManager>,
}

impl DeltaExecutor for TokenExecutor {
    fn name(&self) -> &str {
        "users"
    }

    fn supported_model_types(&self) -> Vec<String> {
        vec!["User".into()]
    }

    fn execute(&self, batch: &[Delta]) -> SyncResult<ExecutionReport> {
        for delta in batch {
            self.consistency.record_token(
                &delta.identifier,
                IamFetchOffset::UserUpdate.slot(),
                ReadYourWriteToken::with_token(format!("{:06}", delta.sequence), 0),
            );
        }
        Ok(ExecutionReport::all(batch))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_releases_waiting_reader() {
    let consistency = Arc::new(ConsistencyManager::new());
    let repo = Arc::new(memory_repo());
    repo.register_executor(Arc::new(TokenExecutor {
        consistency: Arc::clone(&consistency),
    }));

    let model = Model::new("u1", "User");
    model.subscribe(Arc::new(DeltaRecorder::new(Arc::clone(&repo))));
    model.set("language", "en");

    let reader = {
        let consistency = Arc::clone(&consistency);
        tokio::spawn(async move {
            consistency
                .await_condition_timeout(
                    Arc::new(IamFetchReadyCondition::new("u1")),
                    "u1",
                    Duration::from_secs(5),
                )
                .await
        })
    };
    while consistency.pending_waiters("u1") == 0 {
        tokio::task::yield_now().await;
    }

    let flushing = Arc::clone(&repo);
    let report = tokio::task::spawn_blocking(move || flushing.flush(false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.acknowledged, 1);

    let token = reader.await.unwrap().unwrap();
    assert_eq!(token, Some(ReadYourWriteToken::with_token("000001", 0)));
}

#[tokio::test]
async fn force_resolve_unblocks_reader_without_token() {
    let consistency = Arc::new(ConsistencyManager::new());
    let reader = {
        let consistency = Arc::clone(&consistency);
        tokio::spawn(async move {
            consistency
                .await_condition(Arc::new(TokenPresentCondition::new("u2")), "u2")
                .await
        })
    };
    while consistency.pending_waiters("u2") == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(consistency.resolve_conditions_with_id("u2"), 1);
    assert_eq!(reader.await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polling_flushes_in_the_background() {
    let repo = Arc::new(
        OperationRepo::open(
            RepoConfig::new().with_poll_interval(Duration::from_millis(20)),
            Box::new(InMemoryBackend::new()),
            Arc::new(BackgroundTaskManager::disabled()),
        )
        .unwrap(),
    );
    let users = Arc::new(MockExecutor::new("users", &["User"]));
    repo.register_executor(users.clone());
    let poller = repo.start_polling();

    repo.enqueue(Delta::new("u1", "User", "a", 1)).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while repo.pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(users.call_count(), 1);
    poller.abort();
}
