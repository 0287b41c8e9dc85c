use super::*;
use crate::board::{BedId, BedStatus, BoardRules, Snapshot};
use crate::history::{DisplayFormat, HistoryError, LogEntry, ManualClock, RetentionPolicy};
use crate::store::{EntryId, LogStore, SqliteLogStore, StoreError, TimestampPredicate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

fn board(pairs: &[(&'static str, &'static str)]) -> Snapshot {
    pairs.iter().copied().collect()
}

fn on_off_rules(beds: &[&str]) -> BoardRules {
    BoardRules::new(
        beds.iter().map(|b| BedId::from(*b)),
        BedStatus::from("off"),
        ["on", "off"].map(BedStatus::from),
    )
}

fn settings(preserve_initial_entry: bool) -> EngineSettings {
    EngineSettings {
        rules: on_off_rules(&["1", "2"]),
        retention: RetentionPolicy::default(),
        display: DisplayFormat::default(),
        merge: MergeStrategy::Overlay,
        preserve_initial_entry,
        broadcast_capacity: 64,
    }
}

fn engine_at(clock: &Arc<ManualClock>, settings: EngineSettings) -> BoardEngine {
    BoardEngine::new(settings, None, clock.clone())
}

fn timestamps(engine: &BoardEngine) -> Vec<i64> {
    engine.history().query_all().iter().map(|e| e.timestamp).collect()
}

/// Store wrapper that can be switched off to simulate an unreachable database
struct FlakyStore {
    inner: SqliteLogStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: SqliteLogStore::open(":memory:").unwrap(),
            down: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database offline".to_string()));
        }
        Ok(())
    }
}

impl LogStore for FlakyStore {
    fn append(&self, entry: &LogEntry) -> Result<EntryId, StoreError> {
        self.check()?;
        self.inner.append(entry)
    }

    fn query_all_ordered_by_timestamp(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.check()?;
        self.inner.query_all_ordered_by_timestamp()
    }

    fn delete_where(&self, predicate: TimestampPredicate) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.delete_where(predicate)
    }
}

/// Store whose next delete fails once when armed
struct DeleteFailsOnce {
    inner: SqliteLogStore,
    fail_next_delete: AtomicBool,
}

impl DeleteFailsOnce {
    fn new() -> Self {
        Self {
            inner: SqliteLogStore::open(":memory:").unwrap(),
            fail_next_delete: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }
}

impl LogStore for DeleteFailsOnce {
    fn append(&self, entry: &LogEntry) -> Result<EntryId, StoreError> {
        self.inner.append(entry)
    }

    fn query_all_ordered_by_timestamp(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.inner.query_all_ordered_by_timestamp()
    }

    fn delete_where(&self, predicate: TimestampPredicate) -> Result<usize, StoreError> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delete interrupted".to_string()));
        }
        self.inner.delete_where(predicate)
    }
}

fn stored_timestamps(store: &dyn LogStore) -> Vec<i64> {
    store
        .query_all_ordered_by_timestamp()
        .unwrap()
        .iter()
        .map(|e| e.timestamp)
        .collect()
}

fn age_window(millis: i64) -> EngineSettings {
    EngineSettings {
        retention: RetentionPolicy {
            max_entries: None,
            max_age_millis: Some(millis),
        },
        ..settings(false)
    }
}

#[tokio::test]
async fn test_two_bed_scenario() {
    let clock = Arc::new(ManualClock::new(100));
    let mut engine = engine_at(&clock, settings(false));
    let broadcaster = engine.broadcaster();
    let mut session = broadcaster.join();

    // Update({1: on}) at t=100
    engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    assert_eq!(timestamps(&engine), vec![100]);
    assert_eq!(engine.current_state(), board(&[("1", "on"), ("2", "off")]));

    // Update({2: on}) at t=200
    clock.set(200);
    engine.apply(Command::Update(board(&[("2", "on")]))).await.unwrap();
    assert_eq!(timestamps(&engine), vec![100, 200]);
    assert_eq!(engine.current_state(), board(&[("1", "on"), ("2", "on")]));

    // Undo
    let undone = engine.apply(Command::Undo).await.unwrap();
    assert!(undone.is_changed());
    assert_eq!(timestamps(&engine), vec![100]);
    assert_eq!(engine.current_state(), board(&[("1", "on"), ("2", "off")]));

    // Three broadcasts so far
    for _ in 0..3 {
        assert!(session.rx.try_recv().is_ok());
    }

    // Revert to the current entry: no-op, no broadcast
    let reverted = engine.apply(Command::RevertTo { timestamp: 100 }).await.unwrap();
    assert!(!reverted.is_changed());
    assert_eq!(timestamps(&engine), vec![100]);

    // Revert to an unknown timestamp: NotFound, no broadcast
    let missing = engine.apply(Command::RevertTo { timestamp: 999 }).await;
    assert_eq!(missing.unwrap_err(), EngineError::History(HistoryError::NotFound(999)));
    assert_eq!(timestamps(&engine), vec![100]);

    assert!(matches!(session.rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_empty_log_falls_back_to_initial_board() {
    let clock = Arc::new(ManualClock::new(100));
    let mut engine = engine_at(&clock, settings(false));

    engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    engine.apply(Command::Undo).await.unwrap();

    assert!(engine.history().is_empty());
    assert_eq!(engine.current_state(), board(&[("1", "off"), ("2", "off")]));
    assert_eq!(engine.view().current_state, board(&[("1", "off"), ("2", "off")]));
}

#[tokio::test]
async fn test_undo_without_floor_can_empty_log() {
    let clock = Arc::new(ManualClock::new(10));
    let mut engine = engine_at(&clock, settings(false));
    assert_eq!(engine.undo_floor(), 0);

    for ts in [10, 20] {
        clock.set(ts);
        engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    }

    assert!(engine.apply(Command::Undo).await.unwrap().is_changed());
    assert!(engine.apply(Command::Undo).await.unwrap().is_changed());
    assert!(engine.history().is_empty());

    // At the floor: unchanged, not an error
    assert!(!engine.apply(Command::Undo).await.unwrap().is_changed());
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn test_undo_preserves_initial_entry() {
    let clock = Arc::new(ManualClock::new(10));
    let mut engine = engine_at(&clock, settings(true));
    assert_eq!(engine.undo_floor(), 1);

    for ts in [10, 20, 30] {
        clock.set(ts);
        engine.apply(Command::Update(board(&[("2", "on")]))).await.unwrap();
    }

    assert!(engine.apply(Command::Undo).await.unwrap().is_changed());
    assert!(engine.apply(Command::Undo).await.unwrap().is_changed());
    assert_eq!(timestamps(&engine), vec![10]);

    let mut session = engine.broadcaster().join();
    for _ in 0..3 {
        assert!(!engine.apply(Command::Undo).await.unwrap().is_changed());
    }
    assert_eq!(timestamps(&engine), vec![10]);
    assert!(matches!(session.rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_revert_truncates_newer_entries_permanently() {
    let clock = Arc::new(ManualClock::new(0));
    let mut engine = engine_at(&clock, settings(false));

    let steps: [(i64, &'static str, &'static str); 4] =
        [(100, "1", "on"), (200, "2", "on"), (300, "1", "off"), (400, "2", "off")];
    for (ts, bed, status) in steps {
        clock.set(ts);
        engine.apply(Command::Update(board(&[(bed, status)]))).await.unwrap();
    }
    let at_200 = engine.history().find_by_timestamp(200).unwrap().1.snapshot.clone();

    let applied = engine.apply(Command::RevertTo { timestamp: 200 }).await.unwrap();

    let view = applied.view();
    assert_eq!(view.history.last().unwrap().timestamp, 200);
    assert_eq!(view.current_state, at_200);
    assert_eq!(timestamps(&engine), vec![100, 200]);

    // Discarded entries cannot be revert targets any more
    let gone = engine.apply(Command::RevertTo { timestamp: 400 }).await;
    assert_eq!(gone.unwrap_err(), EngineError::History(HistoryError::NotFound(400)));
}

#[tokio::test]
async fn test_same_millisecond_updates_get_distinct_timestamps() {
    let clock = Arc::new(ManualClock::new(500));
    let mut engine = engine_at(&clock, settings(false));

    for status in ["on", "off", "on"] {
        engine.apply(Command::Update(board(&[("1", status)]))).await.unwrap();
    }

    assert_eq!(timestamps(&engine), vec![500, 501, 502]);
}

#[tokio::test]
async fn test_clock_going_backwards_keeps_order() {
    let clock = Arc::new(ManualClock::new(1_000));
    let mut engine = engine_at(&clock, settings(false));

    engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    clock.set(900);
    engine.apply(Command::Update(board(&[("1", "off")]))).await.unwrap();

    assert_eq!(timestamps(&engine), vec![1_000, 1_001]);
}

#[tokio::test]
async fn test_replace_strategy_uses_payload_verbatim() {
    let clock = Arc::new(ManualClock::new(10));
    let mut engine = engine_at(
        &clock,
        EngineSettings {
            merge: MergeStrategy::Replace,
            ..settings(false)
        },
    );

    engine
        .apply(Command::Update(board(&[("1", "on"), ("2", "on")])))
        .await
        .unwrap();
    clock.set(20);
    engine.apply(Command::Update(board(&[("2", "off")]))).await.unwrap();

    assert_eq!(engine.current_state(), board(&[("2", "off")]));
}

#[tokio::test]
async fn test_invalid_update_is_rejected_without_broadcast() {
    let clock = Arc::new(ManualClock::new(10));
    let mut engine = engine_at(&clock, settings(false));
    let mut session = engine.broadcaster().join();

    let unknown_bed = engine.apply(Command::Update(board(&[("9", "on")]))).await;
    assert_eq!(unknown_bed.unwrap_err().code(), "unknown_bed");

    let bad_status = engine.apply(Command::Update(board(&[("1", "cleaning")]))).await;
    assert_eq!(bad_status.unwrap_err().code(), "unknown_status");

    let empty = engine.apply(Command::Update(Snapshot::new())).await;
    assert_eq!(empty.unwrap_err().code(), "empty_update");

    assert!(engine.history().is_empty());
    assert!(matches!(session.rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_retention_caps_history_and_store() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(SqliteLogStore::open(":memory:").unwrap());
    let mut engine = BoardEngine::new(
        EngineSettings {
            retention: RetentionPolicy {
                max_entries: Some(2),
                max_age_millis: None,
            },
            ..settings(false)
        },
        Some(store.clone() as Arc<dyn LogStore>),
        clock.clone(),
    );

    for ts in [1, 2, 3, 4] {
        clock.set(ts);
        engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
        assert!(engine.history().len() <= 2);
    }

    assert_eq!(timestamps(&engine), vec![3, 4]);
    let stored: Vec<i64> = store
        .query_all_ordered_by_timestamp()
        .unwrap()
        .iter()
        .map(|e| e.timestamp)
        .collect();
    assert_eq!(stored, vec![3, 4]);
}

#[tokio::test]
async fn test_age_window_prunes_on_update() {
    let clock = Arc::new(ManualClock::new(0));
    let mut engine = engine_at(
        &clock,
        EngineSettings {
            retention: RetentionPolicy {
                max_entries: None,
                max_age_millis: Some(1_000),
            },
            ..settings(false)
        },
    );

    engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    clock.set(5_000);
    engine.apply(Command::Update(board(&[("2", "on")]))).await.unwrap();

    assert_eq!(timestamps(&engine), vec![5_000]);
    // Delta merged onto the pre-prune board
    assert_eq!(engine.current_state(), board(&[("1", "on"), ("2", "on")]));
}

#[tokio::test]
async fn test_store_failure_rejects_and_leaves_log_unchanged() {
    let clock = Arc::new(ManualClock::new(100));
    let store = Arc::new(FlakyStore::new());
    let mut engine = BoardEngine::new(
        settings(false),
        Some(store.clone() as Arc<dyn LogStore>),
        clock.clone(),
    );
    let mut session = engine.broadcaster().join();

    engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    clock.set(200);
    engine.apply(Command::Update(board(&[("2", "on")]))).await.unwrap();
    assert_eq!(session.rx.try_recv().unwrap().history.len(), 1);
    assert_eq!(session.rx.try_recv().unwrap().history.len(), 2);

    store.set_down(true);
    clock.set(300);

    let update = engine.apply(Command::Update(board(&[("1", "off")]))).await;
    assert!(matches!(update, Err(EngineError::PersistenceUnavailable(_))));
    let undo = engine.apply(Command::Undo).await;
    assert!(matches!(undo, Err(EngineError::PersistenceUnavailable(_))));
    let revert = engine.apply(Command::RevertTo { timestamp: 100 }).await;
    assert!(matches!(revert, Err(EngineError::PersistenceUnavailable(_))));

    assert_eq!(timestamps(&engine), vec![100, 200]);
    assert_eq!(engine.current_state(), board(&[("1", "on"), ("2", "on")]));
    assert!(matches!(session.rx.try_recv(), Err(TryRecvError::Empty)));

    // Caller resubmits once the store is back
    store.set_down(false);
    engine.apply(Command::Update(board(&[("1", "off")]))).await.unwrap();
    assert_eq!(timestamps(&engine), vec![100, 200, 300]);
}

#[tokio::test]
async fn test_hydrate_restores_persisted_history() {
    let clock = Arc::new(ManualClock::new(100));
    let store: Arc<dyn LogStore> = Arc::new(SqliteLogStore::open(":memory:").unwrap());

    {
        let mut engine = BoardEngine::new(settings(false), Some(store.clone()), clock.clone());
        engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
        clock.set(200);
        engine.apply(Command::Update(board(&[("2", "on")]))).await.unwrap();
        clock.set(300);
        engine.apply(Command::Update(board(&[("1", "off")]))).await.unwrap();
        engine.apply(Command::RevertTo { timestamp: 200 }).await.unwrap();
    }

    let mut restored = BoardEngine::new(settings(false), Some(store), clock.clone());
    let retained = restored.hydrate().await.unwrap();

    assert_eq!(retained, 2);
    assert_eq!(timestamps(&restored), vec![100, 200]);
    assert_eq!(restored.current_state(), board(&[("1", "on"), ("2", "on")]));
    assert_eq!(restored.broadcaster().latest().history.len(), 2);
}

#[tokio::test]
async fn test_hydrate_prunes_expired_entries() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(SqliteLogStore::open(":memory:").unwrap());
    let format = DisplayFormat::default();
    for ts in [100, 200, 10_000] {
        store
            .append(&LogEntry::new(ts, board(&[("1", "on")]), &format))
            .unwrap();
    }

    clock.set(10_500);
    let mut engine = BoardEngine::new(
        EngineSettings {
            retention: RetentionPolicy {
                max_entries: None,
                max_age_millis: Some(1_000),
            },
            ..settings(false)
        },
        Some(store.clone() as Arc<dyn LogStore>),
        clock.clone(),
    );
    engine.hydrate().await.unwrap();

    assert_eq!(timestamps(&engine), vec![10_000]);
    assert_eq!(store.query_all_ordered_by_timestamp().unwrap().len(), 1);
}

#[tokio::test]
async fn test_hydrate_without_store_publishes_initial_board() {
    let clock = Arc::new(ManualClock::new(42));
    let mut engine = engine_at(&clock, settings(false));

    assert_eq!(engine.hydrate().await.unwrap(), 0);
    let latest = engine.broadcaster().latest();
    assert!(latest.history.is_empty());
    assert_eq!(latest.current_state, board(&[("1", "off"), ("2", "off")]));
    assert_eq!(latest.produced_at, 42);
}

#[tokio::test]
async fn test_concurrent_submissions_are_serialized() {
    let clock = Arc::new(ManualClock::new(1_000));
    let beds: Vec<String> = (0..10).map(|i| format!("bed-{}", i)).collect();
    let bed_refs: Vec<&str> = beds.iter().map(|b| b.as_str()).collect();
    let engine = BoardEngine::new(
        EngineSettings {
            rules: on_off_rules(&bed_refs),
            retention: RetentionPolicy::unbounded(),
            ..settings(false)
        },
        None,
        clock.clone(),
    );
    let broadcaster = engine.broadcaster();
    let mut session = broadcaster.join();
    let (handle, task) = engine.spawn(4);

    let mut submitters = Vec::new();
    for bed in beds.clone() {
        let handle = handle.clone();
        submitters.push(tokio::spawn(async move {
            let delta: Snapshot = [(BedId::new(bed), BedStatus::from("on"))].into_iter().collect();
            handle.submit(Command::Update(delta)).await
        }));
    }
    for submitter in submitters {
        assert!(submitter.await.unwrap().unwrap().is_changed());
    }

    let latest = broadcaster.latest();
    let ts: Vec<i64> = latest.history.iter().map(|e| e.timestamp).collect();
    assert_eq!(ts, (1_000..1_010).collect::<Vec<_>>());
    // No delta was clobbered by a concurrent one
    assert!(latest.current_state.iter().all(|(_, s)| s.as_str() == "on"));
    assert_eq!(latest.current_state.len(), 10);

    // Every broadcast is internally consistent
    let mut seen = 0;
    while let Ok(view) = session.rx.try_recv() {
        assert_eq!(view.current_state, view.history.last().unwrap().snapshot);
        seen += 1;
    }
    assert_eq!(seen, 10);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn test_handle_reports_stopped_engine() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = engine_at(&clock, settings(false));
    let (handle, task) = engine.spawn(1);
    task.abort();
    let _ = task.await;

    let result = handle.submit(Command::Undo).await;
    assert_eq!(result.unwrap_err(), EngineError::EngineStopped);
}

#[test]
fn test_store_errors_map_to_taxonomy() {
    assert_eq!(
        EngineError::from(StoreError::DuplicateTimestamp(5)),
        EngineError::History(HistoryError::DuplicateTimestamp(5))
    );
    assert_eq!(
        EngineError::from(StoreError::OutOfOrderTimestamp {
            timestamp: 1,
            latest: 2
        })
        .code(),
        "out_of_order_timestamp"
    );
    assert!(matches!(
        EngineError::from(StoreError::Unavailable("down".to_string())),
        EngineError::PersistenceUnavailable(_)
    ));
}

#[tokio::test]
async fn test_undo_prunes_entries_outside_age_window() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(SqliteLogStore::open(":memory:").unwrap());
    let mut engine = BoardEngine::new(
        age_window(1_000),
        Some(store.clone() as Arc<dyn LogStore>),
        clock.clone(),
    );

    engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    clock.set(900);
    engine.apply(Command::Update(board(&[("2", "on")]))).await.unwrap();
    assert_eq!(timestamps(&engine), vec![0, 900]);

    clock.set(10_000);
    let mut session = engine.broadcaster().join();
    let applied = engine.apply(Command::Undo).await.unwrap();

    // The entry undo would have exposed is long stale
    let view = applied.view();
    assert!(view.history.is_empty());
    assert_eq!(view.current_state, board(&[("1", "off"), ("2", "off")]));
    assert_eq!(session.rx.try_recv().unwrap().history.len(), 0);
    assert!(stored_timestamps(store.as_ref()).is_empty());
}

#[tokio::test]
async fn test_revert_prunes_entries_outside_age_window() {
    let clock = Arc::new(ManualClock::new(0));
    let mut engine = engine_at(&clock, age_window(1_000));

    for (ts, status) in [(0, "on"), (500, "off"), (900, "on")] {
        clock.set(ts);
        engine.apply(Command::Update(board(&[("1", status)]))).await.unwrap();
    }

    clock.set(1_400);
    let applied = engine.apply(Command::RevertTo { timestamp: 500 }).await.unwrap();

    let cutoff = 1_400 - 1_000;
    assert!(applied.view().history.iter().all(|e| e.timestamp >= cutoff));
    assert_eq!(timestamps(&engine), vec![500]);
    assert_eq!(engine.current_state(), board(&[("1", "off"), ("2", "off")]));
}

#[tokio::test]
async fn test_failed_prune_delete_is_retried() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(DeleteFailsOnce::new());
    let capped = EngineSettings {
        retention: RetentionPolicy {
            max_entries: Some(2),
            max_age_millis: None,
        },
        ..settings(false)
    };
    let mut engine = BoardEngine::new(
        capped.clone(),
        Some(store.clone() as Arc<dyn LogStore>),
        clock.clone(),
    );

    for ts in [1, 2] {
        clock.set(ts);
        engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();
    }
    store.arm();
    clock.set(3);
    engine.apply(Command::Update(board(&[("2", "on")]))).await.unwrap();

    assert_eq!(timestamps(&engine), vec![2, 3]);
    assert_eq!(stored_timestamps(store.as_ref()), vec![1, 2, 3]);
    assert_eq!(engine.pruned_through, Some(1));

    // The next store write also clears the leftover row
    engine.apply(Command::Undo).await.unwrap();
    assert_eq!(stored_timestamps(store.as_ref()), vec![2]);
    assert_eq!(engine.pruned_through, None);

    engine.apply(Command::Undo).await.unwrap();
    assert!(engine.history().is_empty());

    let mut restarted = BoardEngine::new(capped, Some(store.clone() as Arc<dyn LogStore>), clock.clone());
    assert_eq!(restarted.hydrate().await.unwrap(), 0);
    assert!(restarted.history().is_empty());
}

#[tokio::test]
async fn test_unchanged_carries_board_at_apply_time() {
    let clock = Arc::new(ManualClock::new(100));
    let mut engine = engine_at(&clock, settings(true));

    engine.apply(Command::Update(board(&[("1", "on")]))).await.unwrap();

    let undo = engine.apply(Command::Undo).await.unwrap();
    assert!(!undo.is_changed());
    assert_eq!(undo.view().current_state, board(&[("1", "on"), ("2", "off")]));
    assert_eq!(undo.view().history.len(), 1);

    let revert = engine.apply(Command::RevertTo { timestamp: 100 }).await.unwrap();
    assert!(!revert.is_changed());
    assert_eq!(revert.view().current_state, engine.current_state());
}
