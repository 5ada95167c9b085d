//! End-to-end sync scenarios against the in-memory server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use medtrack_core::transport::{
    DeltaRequest, DeltaResponse, ResolveConflictRequest, ServerSyncStatus, SubmitRequest,
    SubmitResponse, TransportResult,
};
use medtrack_core::{
    CacheTable, ConflictResolution, ConflictType, ConnectivityMonitor, CycleOutcome,
    DeletePolicy, EntityKey, EntityType, LastSyncStatus, LocalStore, MemoryServer, OfflineQueue,
    QueueAction, RetryPolicy, SyncConfig, SyncEngine, SyncReport, SyncTransport,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn engine_with<T: SyncTransport>(store: LocalStore, transport: T, config: SyncConfig) -> SyncEngine<T> {
    SyncEngine::new(
        OfflineQueue::new(store),
        ConnectivityMonitor::new(true),
        transport,
        config.without_auto_sync(),
    )
}

fn setup() -> (SyncEngine<MemoryServer>, MemoryServer) {
    let server = MemoryServer::new();
    let engine = engine_with(LocalStore::in_memory(), server.clone(), SyncConfig::default());
    (engine, server)
}

async fn completed<T: SyncTransport>(engine: &SyncEngine<T>) -> SyncReport {
    match engine.run_sync().await.unwrap() {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

async fn cursor_version(store: &LocalStore, entity_type: EntityType) -> i64 {
    store
        .get_cursor(entity_type)
        .await
        .unwrap()
        .map_or(0, |cursor| cursor.last_sync_version)
}

async fn cached_count(store: &LocalStore) -> usize {
    let mut total = 0;
    for table in CacheTable::ALL {
        total += store.get_all(table).await.unwrap().len();
    }
    total
}

#[tokio::test]
async fn enqueue_n_items_gives_length_n() {
    let (engine, _server) = setup();
    for n in 0..7 {
        engine
            .queue()
            .enqueue(QueueAction::Update, "item", &format!("item-{n}"), json!({"n": n}))
            .await
            .unwrap();
    }

    assert_eq!(engine.queue().len().await.unwrap(), 7);
    assert_eq!(engine.status().pending_changes, 7);
}

#[tokio::test]
async fn concurrent_syncs_issue_one_submit() {
    let (engine, server) = setup();
    engine
        .queue()
        .enqueue(QueueAction::Create, "item", "item-1", json!({"id": "item-1"}))
        .await
        .unwrap();

    let (first, second) = tokio::join!(engine.perform_sync(), engine.perform_sync());

    assert_eq!(server.submit_requests().len(), 1);
    assert_eq!(server.delta_requests().len(), 1);
    assert_eq!(first.last_sync_status, LastSyncStatus::Success);
    // The second call saw the first cycle in flight
    assert!(second.is_syncing);
    assert!(engine.queue().is_empty().await.unwrap());
}

#[tokio::test]
async fn back_to_back_run_sync_reports_already_running() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(20));
    let engine = engine_with(LocalStore::in_memory(), server.clone(), SyncConfig::default());

    let (first, second) = tokio::join!(engine.run_sync(), engine.run_sync());
    assert!(matches!(first.unwrap(), CycleOutcome::Completed(_)));
    assert_eq!(second.unwrap(), CycleOutcome::AlreadyRunning);
    assert_eq!(server.delta_requests().len(), 1);
}

#[tokio::test]
async fn accepted_item_leaves_queue() {
    let (engine, _server) = setup();
    let keep = engine
        .queue()
        .enqueue(QueueAction::Update, "item", "item-1", json!({"qty": 1}))
        .await
        .unwrap();
    completed(&engine).await;

    engine
        .queue()
        .enqueue(QueueAction::Checkin, "checkout", "co-1", json!({"id": "co-1"}))
        .await
        .unwrap();
    assert_eq!(engine.status().pending_changes, 1);

    let report = completed(&engine).await;
    assert_eq!(report.accepted, 1);
    assert_eq!(engine.status().pending_changes, 0);
    assert!(engine.queue().get(&keep).await.unwrap().is_none());
}

#[tokio::test]
async fn conflicted_item_is_retained_untouched() {
    let (engine, server) = setup();
    server.seed(EntityType::Item, "item-1", json!({"id": "item-1", "qty": 1}));
    server.seed(EntityType::Item, "item-1", json!({"id": "item-1", "qty": 2}));

    let id = engine
        .queue()
        .enqueue(QueueAction::Update, "item", "item-1", json!({"qty": 5, "version": 1}))
        .await
        .unwrap();
    let before = engine.queue().get(&id).await.unwrap().unwrap();

    let report = completed(&engine).await;
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].conflict_type, ConflictType::VersionMismatch);
    assert_eq!(report.conflicts[0].server_version, Some(2));

    let after = engine.queue().get(&id).await.unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(after.retry_count, 0);
    assert_eq!(engine.status().pending_changes, 1);
    assert_eq!(engine.status().outstanding_conflicts, 1);
}

#[tokio::test]
async fn client_wins_pushes_local_payload() {
    let (engine, server) = setup();
    server.seed(EntityType::Item, "item-1", json!({"id": "item-1", "qty": 1}));
    server.seed(EntityType::Item, "item-1", json!({"id": "item-1", "qty": 2}));
    engine
        .queue()
        .enqueue(
            QueueAction::Update,
            "item",
            "item-1",
            json!({"id": "item-1", "qty": 9, "version": 1}),
        )
        .await
        .unwrap();

    let report = completed(&engine).await;
    let conflict = report.conflicts[0].clone();
    engine
        .resolve_conflict(&conflict, ConflictResolution::ClientWins, None)
        .await
        .unwrap();

    assert!(engine.queue().is_empty().await.unwrap());
    let resolution = &server.resolutions()[0];
    assert_eq!(resolution.merged_data.as_ref().unwrap()["qty"], 9);
    assert_eq!(resolution.conflict.resolution, Some(ConflictResolution::ClientWins));

    completed(&engine).await;
    let cached = engine
        .store()
        .get(CacheTable::Items, &EntityKey::id("item-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.data["qty"], 9);
    assert_eq!(engine.status().last_sync_status, LastSyncStatus::Success);
}

#[tokio::test]
async fn merge_submits_caller_data() {
    let (engine, server) = setup();
    server.seed(EntityType::PickList, "pl-1", json!({"id": "pl-1"}));
    server.remove(EntityType::PickList, "pl-1");
    engine
        .queue()
        .enqueue(QueueAction::PickItem, "pick_list", "pl-1", json!({"picked": 1}))
        .await
        .unwrap();

    let report = completed(&engine).await;
    assert_eq!(report.conflicts[0].conflict_type, ConflictType::Deleted);

    let merged = json!({"id": "pl-1", "picked": 1, "restored": true});
    engine
        .resolve_conflict(&report.conflicts[0], ConflictResolution::Merge, Some(merged))
        .await
        .unwrap();
    assert_eq!(
        server.entity(EntityType::PickList, "pl-1").unwrap()["restored"],
        true
    );
    assert!(engine.queue().is_empty().await.unwrap());
}

#[tokio::test]
async fn cursors_never_decrease_across_syncs() {
    let (engine, server) = setup();
    let mut previous = 0;

    for round in 0..4 {
        server.seed(EntityType::Item, &format!("item-{round}"), json!({"id": format!("item-{round}")}));
        completed(&engine).await;

        let current = cursor_version(engine.store(), EntityType::Item).await;
        assert!(current >= previous);
        previous = current;
    }

    completed(&engine).await;
    assert_eq!(cursor_version(engine.store(), EntityType::Item).await, previous);
    assert_eq!(previous, server.version());
}

#[tokio::test]
async fn stock_adjust_made_offline_syncs_when_back_online() {
    let server = MemoryServer::new();
    let engine = SyncEngine::new(
        OfflineQueue::new(LocalStore::in_memory()),
        ConnectivityMonitor::new(false),
        server.clone(),
        SyncConfig::default().without_auto_sync(),
    );
    let listener = engine.spawn_connectivity_listener();
    let mut status = engine.subscribe_status();

    engine
        .queue()
        .enqueue(QueueAction::StockAdjust, "stock", "item-42", json!({"delta": -5}))
        .await
        .unwrap();
    assert_eq!(engine.perform_sync().await.pending_changes, 1);
    assert!(server.submit_requests().is_empty());

    engine.connectivity().set_online(true);
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|status| status.last_sync_status != LastSyncStatus::Never),
    )
    .await
    .unwrap()
    .unwrap();

    let status = engine.status();
    assert!(engine.queue().is_empty().await.unwrap());
    assert_eq!(status.pending_changes, 0);
    assert_eq!(status.last_sync_status, LastSyncStatus::Success);
    assert_eq!(
        server.submit_requests()[0].actions[0].entity_type,
        EntityType::StockLevel
    );

    let level = engine
        .store()
        .get(CacheTable::StockLevels, &EntityKey::composite("item-42", "default"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(level.data["delta"], -5);

    listener.abort();
}

/// Records what the local store looked like when each delta request went out
#[derive(Clone)]
struct ObservingTransport {
    server: MemoryServer,
    store: LocalStore,
    observed: Arc<Mutex<Vec<(usize, Vec<i64>)>>>,
}

impl SyncTransport for ObservingTransport {
    async fn submit(&self, request: SubmitRequest) -> TransportResult<SubmitResponse> {
        self.server.submit(request).await
    }

    async fn delta(&self, request: DeltaRequest) -> TransportResult<DeltaResponse> {
        let cached = cached_count(&self.store).await;
        let mut cursors = Vec::new();
        for entity_type in EntityType::ALL {
            cursors.push(cursor_version(&self.store, entity_type).await);
        }
        self.observed.lock().unwrap().push((cached, cursors));
        self.server.delta(request).await
    }

    async fn resolve_conflict(&self, request: ResolveConflictRequest) -> TransportResult<()> {
        self.server.resolve_conflict(request).await
    }

    async fn status(&self) -> TransportResult<ServerSyncStatus> {
        self.server.status().await
    }
}

#[tokio::test]
async fn force_full_sync_clears_before_pulling() {
    let server = MemoryServer::new();
    let store = LocalStore::in_memory();
    let transport = ObservingTransport {
        server: server.clone(),
        store: store.clone(),
        observed: Arc::new(Mutex::new(Vec::new())),
    };
    let engine = engine_with(store.clone(), transport.clone(), SyncConfig::default());

    server.seed(EntityType::Item, "item-1", json!({"id": "item-1"}));
    server.seed(EntityType::Checkout, "co-1", json!({"id": "co-1"}));
    completed(&engine).await;
    // A local-only entry the server knows nothing about
    store
        .put(CacheTable::PickLists, &json!({"id": "orphan"}))
        .await
        .unwrap();
    assert_eq!(cached_count(&store).await, 3);
    assert!(cursor_version(&store, EntityType::Item).await > 0);

    let report = engine.force_full_sync().await.unwrap();
    assert_eq!(report.applied, 2);

    let observed = transport.observed.lock().unwrap().clone();
    let (cached, cursors) = observed.last().unwrap();
    assert_eq!(*cached, 0);
    assert_eq!(cursors, &vec![0, 0, 0, 0]);

    let request = server.delta_requests().last().unwrap().clone();
    assert!(request.cursors.iter().all(|cursor| cursor.last_sync_version == 0));

    assert_eq!(cached_count(&store).await, 2);
    assert!(store
        .get(CacheTable::PickLists, &EntityKey::id("orphan"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn has_more_pages_converge_in_one_sync() {
    let server = MemoryServer::new();
    let engine = engine_with(
        LocalStore::in_memory(),
        server.clone(),
        SyncConfig::default().with_max_changes(Some(2)),
    );
    for n in 0..7 {
        server.seed(EntityType::Checkout, &format!("co-{n}"), json!({"id": format!("co-{n}")}));
    }

    let report = completed(&engine).await;
    assert_eq!(report.pull_rounds, 4);
    assert_eq!(report.applied, 7);
    assert_eq!(engine.store().get_all(CacheTable::Checkouts).await.unwrap().len(), 7);
    assert_eq!(cursor_version(engine.store(), EntityType::Checkout).await, 7);
}

#[tokio::test]
async fn pull_round_cap_resumes_next_cycle() {
    let server = MemoryServer::new();
    let engine = engine_with(
        LocalStore::in_memory(),
        server.clone(),
        SyncConfig::default()
            .with_max_changes(Some(2))
            .with_max_pull_rounds(2),
    );
    for n in 0..7 {
        server.seed(EntityType::Item, &format!("item-{n}"), json!({"id": format!("item-{n}")}));
    }

    let report = completed(&engine).await;
    assert_eq!(report.pull_rounds, 2);
    assert_eq!(engine.store().get_all(CacheTable::Items).await.unwrap().len(), 4);
    assert_eq!(cursor_version(engine.store(), EntityType::Item).await, 4);

    let report = completed(&engine).await;
    assert_eq!(report.applied, 3);
    assert_eq!(engine.store().get_all(CacheTable::Items).await.unwrap().len(), 7);
}

#[tokio::test]
async fn server_deletions_are_applied_by_default() {
    let (engine, server) = setup();
    server.seed(EntityType::Item, "item-1", json!({"id": "item-1", "sku": "PUMP-1"}));
    completed(&engine).await;
    assert_eq!(engine.config().delete_policy, DeletePolicy::Apply);

    server.remove(EntityType::Item, "item-1");
    let report = completed(&engine).await;
    assert_eq!(report.deleted, 1);
    assert!(engine
        .store()
        .get(CacheTable::Items, &EntityKey::id("item-1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failed_pull_keeps_cursor_and_resumes() {
    let (engine, server) = setup();
    server.seed(EntityType::Item, "item-1", json!({"id": "item-1"}));
    server.fail_next_deltas(1);

    let status = engine.perform_sync().await;
    assert_eq!(status.last_sync_status, LastSyncStatus::Failed);
    assert!(!status.is_syncing);
    assert_eq!(cursor_version(engine.store(), EntityType::Item).await, 0);

    let status = engine.perform_sync().await;
    assert_eq!(status.last_sync_status, LastSyncStatus::Success);
    assert_eq!(status.last_sync_error, None);
    assert_eq!(cursor_version(engine.store(), EntityType::Item).await, 1);
}

#[tokio::test]
async fn retries_stop_at_cap_and_item_can_be_quarantined() {
    let server = MemoryServer::new();
    let policy = RetryPolicy::immediate(2);
    let engine = engine_with(
        LocalStore::in_memory(),
        server.clone(),
        SyncConfig::default().with_retry_policy(policy),
    );
    let id = engine
        .queue()
        .enqueue(QueueAction::Delete, "checkout", "co-1", json!({}))
        .await
        .unwrap();
    server.fail_next_submits(10);

    engine.perform_sync().await;
    engine.perform_sync().await;
    assert_eq!(server.submit_requests().len(), 2);
    assert_eq!(engine.queue().get(&id).await.unwrap().unwrap().retry_count, 2);

    let report = completed(&engine).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(server.submit_requests().len(), 2);
    assert_eq!(engine.status().pending_changes, 1);

    assert_eq!(engine.queue().quarantine_exhausted(policy.max_retries).await.unwrap(), 1);
    assert_eq!(engine.status().pending_changes, 0);
    assert_eq!(engine.queue().dead_letters().await.unwrap()[0].item.id, id);
}

#[tokio::test]
async fn backoff_defers_failed_items() {
    let (engine, server) = setup();
    engine
        .queue()
        .enqueue(QueueAction::Update, "item", "item-1", json!({}))
        .await
        .unwrap();
    server.fail_next_submits(1);

    engine.perform_sync().await;
    let report = completed(&engine).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(server.submit_requests().len(), 1);
}

#[tokio::test]
async fn auto_sync_ticks_only_while_online() {
    let server = MemoryServer::new();
    let engine = SyncEngine::new(
        OfflineQueue::new(LocalStore::in_memory()),
        ConnectivityMonitor::new(false),
        server.clone(),
        SyncConfig::default(),
    );

    engine.start_auto_sync(Duration::from_millis(20));
    assert!(engine.is_auto_sync_enabled());
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(server.request_count(), 0);

    engine.connectivity().set_online(true);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!server.delta_requests().is_empty());

    engine.stop_auto_sync();
    assert!(!engine.is_auto_sync_enabled());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = server.request_count();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(server.request_count(), settled);
}

#[tokio::test]
async fn queue_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("medtrack.db");
    let server = MemoryServer::new();

    let engine = engine_with(LocalStore::at_path(&path), server.clone(), SyncConfig::default());
    engine.connectivity().set_online(false);
    engine
        .queue()
        .enqueue(QueueAction::Checkout, "checkout", "co-9", json!({"id": "co-9"}))
        .await
        .unwrap();
    drop(engine);

    let engine = engine_with(LocalStore::at_path(&path), server.clone(), SyncConfig::default());
    assert_eq!(engine.queue().refresh().await.unwrap(), 1);

    let report = completed(&engine).await;
    assert_eq!(report.accepted, 1);
    assert!(server.entity(EntityType::Checkout, "co-9").is_some());
}

#[tokio::test]
async fn server_sku_swap_applies_and_advances_cursors() {
    let (engine, server) = setup();
    server.seed(EntityType::Item, "a", json!({"id": "a", "sku": "X"}));
    server.seed(EntityType::Item, "b", json!({"id": "b", "sku": "Y"}));
    completed(&engine).await;

    // Only the latest state of each record reaches the client: b{X} then a{Y}
    server.seed(EntityType::Item, "a", json!({"id": "a", "sku": "TMP"}));
    server.seed(EntityType::Item, "b", json!({"id": "b", "sku": "X"}));
    server.seed(EntityType::Item, "a", json!({"id": "a", "sku": "Y"}));
    server.seed(
        EntityType::StockLevel,
        "a:main",
        json!({"itemId": "a", "warehouseId": "main", "qty": 4}),
    );

    let report = completed(&engine).await;
    assert_eq!(report.applied, 3);
    assert_eq!(engine.status().last_sync_status, LastSyncStatus::Success);

    let store = engine.store();
    let a = store.get(CacheTable::Items, &EntityKey::id("a")).await.unwrap().unwrap();
    let b = store.get(CacheTable::Items, &EntityKey::id("b")).await.unwrap().unwrap();
    assert_eq!(a.data["sku"], "Y");
    assert_eq!(b.data["sku"], "X");
    assert_eq!(cursor_version(store, EntityType::Item).await, server.version() - 1);
    assert_eq!(cursor_version(store, EntityType::StockLevel).await, server.version());
}

#[tokio::test]
async fn retired_sku_reused_under_ignored_deletes() {
    let server = MemoryServer::new();
    let engine = engine_with(
        LocalStore::in_memory(),
        server.clone(),
        SyncConfig::default().with_delete_policy(DeletePolicy::Ignore),
    );
    server.seed(EntityType::Item, "old", json!({"id": "old", "sku": "GAUZE-10"}));
    completed(&engine).await;

    server.remove(EntityType::Item, "old");
    server.seed(EntityType::Item, "new", json!({"id": "new", "sku": "GAUZE-10"}));

    let report = completed(&engine).await;
    assert_eq!(report.applied, 1);
    assert_eq!(engine.status().last_sync_status, LastSyncStatus::Success);
    assert_eq!(cursor_version(engine.store(), EntityType::Item).await, server.version());
    assert_eq!(engine.store().get_all(CacheTable::Items).await.unwrap().len(), 2);
}

#[tokio::test]
async fn stop_auto_sync_lets_in_flight_cycle_finish() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(40));
    let engine = SyncEngine::new(
        OfflineQueue::new(LocalStore::in_memory()),
        ConnectivityMonitor::new(true),
        server.clone(),
        SyncConfig::default(),
    );
    engine
        .queue()
        .enqueue(QueueAction::Update, "item", "item-1", json!({"id": "item-1", "qty": 2}))
        .await
        .unwrap();
    let mut status = engine.subscribe_status();

    engine.start_auto_sync(Duration::from_millis(10));
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|status| status.is_syncing))
        .await
        .unwrap()
        .unwrap();
    engine.stop_auto_sync();
    assert!(!engine.is_auto_sync_enabled());

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|status| status.last_sync_status != LastSyncStatus::Never),
    )
    .await
    .unwrap()
    .unwrap();

    let status = engine.status();
    assert_eq!(status.last_sync_status, LastSyncStatus::Success);
    assert!(engine.queue().is_empty().await.unwrap());
    assert!(server.entity(EntityType::Item, "item-1").is_some());
}

#[tokio::test]
async fn going_offline_mid_cycle_does_not_cancel_it() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(30));
    let engine = engine_with(LocalStore::in_memory(), server.clone(), SyncConfig::default());
    engine
        .queue()
        .enqueue(
            QueueAction::StockAdjust,
            "stock",
            "item-1:main",
            json!({"itemId": "item-1", "warehouseId": "main", "delta": -1}),
        )
        .await
        .unwrap();
    let mut status = engine.subscribe_status();

    let cycle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_sync().await }
    });
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|status| status.is_syncing))
        .await
        .unwrap()
        .unwrap();
    assert!(engine.connectivity().set_online(false));

    let report = match cycle.await.unwrap().unwrap() {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    };
    assert_eq!(report.accepted, 1);
    assert_eq!(report.pull_rounds, 1);

    let status = engine.status();
    assert!(!status.is_online);
    assert_eq!(status.last_sync_status, LastSyncStatus::Success);
    assert!(engine.queue().is_empty().await.unwrap());
}
