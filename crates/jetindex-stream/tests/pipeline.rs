//! End-to-end connector tests: scripted transport → decode → queue →
//! filter → map → persist → cursor, including reconnection, replay,
//! backpressure, and failure escalation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    commit_frame, post_frame, wait_until, AlwaysTransientRepo, GatedRepo, Item, ScriptedTransport,
};
use jetindex_core::error::IndexerError;
use jetindex_core::tracker::CursorStore;
use jetindex_core::types::Collection;
use jetindex_observability::IndexerMetrics;
use jetindex_storage::InMemoryStorage;
use jetindex_stream::{Connector, ConnectorConfig, ConnectorState};

fn test_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::new("scripted://test");
    config.reconnect_initial_ms = 5;
    config.reconnect_max_ms = 50;
    config.persistence_initial_ms = 5;
    config
}

async fn spawn_connector(
    config: ConnectorConfig,
    transport: Arc<ScriptedTransport>,
    storage: Arc<InMemoryStorage>,
) -> jetindex_stream::ConnectorHandle {
    Connector::new(
        config,
        transport,
        storage.clone(),
        storage,
        IndexerMetrics::global(),
    )
    .spawn()
    .await
    .expect("connector must start")
}

// ─── End-to-end scenario ──────────────────────────────────────────────────────

#[tokio::test]
async fn create_replay_delete_scenario() {
    let create = post_frame("did:plc:alice", 100, "3kpost", "rev1");
    let replay = create.clone();
    let delete = commit_frame(
        "did:plc:alice",
        101,
        "app.gather.post",
        "3kpost",
        "rev2",
        "delete",
        None,
    );

    let transport = Arc::new(ScriptedTransport::new().session_hang(vec![
        Item::Frame(create),
        Item::Frame(replay),
        Item::Frame(delete),
    ]));
    let storage = Arc::new(InMemoryStorage::new());
    let handle = spawn_connector(test_config(), transport, storage.clone()).await;

    // The delete lands last; once its tombstone is visible the whole
    // scenario has been processed.
    let done = wait_until(
        || {
            storage
                .get("did:plc:alice", Collection::Post, "3kpost")
                .map(|row| row.deleted_at.is_some())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "delete never became visible");

    // Exactly one row: the replayed create was a duplicate.
    assert_eq!(storage.entity_count(), 1);
    assert_eq!(storage.active_entity_count(), 0); // tombstoned
    assert_eq!(storage.marker_count(), 2); // create + delete, replay skipped

    let row = storage
        .get("did:plc:alice", Collection::Post, "3kpost")
        .unwrap();
    assert_eq!(row.rev, "rev2");
    assert!(row.body.is_some(), "soft delete retains the body");

    let state_watch = handle.state_watch();
    handle.shutdown().await.unwrap();
    assert_eq!(*state_watch.borrow(), ConnectorState::Stopped);
}

// ─── Resume & replay ──────────────────────────────────────────────────────────

#[tokio::test]
async fn restart_resumes_from_persisted_cursor() {
    let storage = Arc::new(InMemoryStorage::new());

    // First run: three creates, then shut down.
    let transport = Arc::new(ScriptedTransport::new().session_hang(vec![
        Item::Frame(post_frame("did:plc:alice", 1, "a", "r1")),
        Item::Frame(post_frame("did:plc:alice", 2, "b", "r1")),
        Item::Frame(post_frame("did:plc:alice", 3, "c", "r1")),
    ]));
    assert_eq!(transport.recorded_cursors(), Vec::<Option<u64>>::new());
    let handle = spawn_connector(test_config(), transport.clone(), storage.clone()).await;
    assert!(
        wait_until(|| storage.active_entity_count() == 3, Duration::from_secs(5)).await,
        "first run never indexed its frames"
    );
    handle.shutdown().await.unwrap();
    assert_eq!(transport.recorded_cursors(), vec![None]);
    assert_eq!(storage.load("jetindex").await.unwrap(), Some(3));

    // Second run against the same store: the upstream re-delivers the
    // overlap window plus one new record.
    let transport2 = Arc::new(ScriptedTransport::new().session_hang(vec![
        Item::Frame(post_frame("did:plc:alice", 2, "b", "r1")),
        Item::Frame(post_frame("did:plc:alice", 3, "c", "r1")),
        Item::Frame(post_frame("did:plc:alice", 4, "d", "r1")),
    ]));
    let handle = spawn_connector(test_config(), transport2.clone(), storage.clone()).await;
    assert!(
        wait_until(|| storage.active_entity_count() == 4, Duration::from_secs(5)).await,
        "second run never indexed the new frame"
    );

    // Subscribed from the persisted high-water mark, and the re-delivered
    // records did not create extra rows.
    assert_eq!(transport2.recorded_cursors(), vec![Some(3)]);
    assert_eq!(storage.entity_count(), 4);
    assert_eq!(storage.marker_count(), 4);
    assert_eq!(storage.load("jetindex").await.unwrap(), Some(4));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn midstream_drop_reconnects_and_dedups_redelivery() {
    let storage = Arc::new(InMemoryStorage::new());

    let transport = Arc::new(
        ScriptedTransport::new()
            .session(vec![
                Item::Frame(post_frame("did:plc:alice", 10, "a", "r1")),
                Item::Frame(post_frame("did:plc:alice", 11, "b", "r1")),
                Item::Fail,
            ])
            .session_hang(vec![
                // Redelivery of the overlap window, then fresh data.
                Item::Frame(post_frame("did:plc:alice", 10, "a", "r1")),
                Item::Frame(post_frame("did:plc:alice", 11, "b", "r1")),
                Item::Frame(post_frame("did:plc:alice", 12, "c", "r1")),
            ]),
    );
    let handle = spawn_connector(test_config(), transport.clone(), storage.clone()).await;

    assert!(
        wait_until(|| storage.active_entity_count() == 3, Duration::from_secs(5)).await,
        "connector never recovered from the drop"
    );

    // Two subscriptions happened; re-delivered records added no rows.
    assert_eq!(transport.recorded_cursors().len(), 2);
    assert_eq!(storage.entity_count(), 3);
    assert_eq!(storage.marker_count(), 3);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn same_microsecond_replay_adds_no_rows() {
    let storage = Arc::new(InMemoryStorage::new());

    // Two distinct records sharing one sequence value.
    let frames = || {
        vec![
            Item::Frame(post_frame("did:plc:alice", 1_000, "a", "r1")),
            Item::Frame(post_frame("did:plc:bob", 1_000, "b", "r1")),
        ]
    };

    let transport = Arc::new(ScriptedTransport::new().session_hang(frames()));
    let handle = spawn_connector(test_config(), transport, storage.clone()).await;
    assert!(wait_until(|| storage.active_entity_count() == 2, Duration::from_secs(5)).await);
    handle.shutdown().await.unwrap();
    assert_eq!(storage.load("jetindex").await.unwrap(), Some(1_000));

    // Restart from that cursor replays the whole microsecond.
    let transport2 = Arc::new(ScriptedTransport::new().session_hang(frames()));
    let handle = spawn_connector(test_config(), transport2.clone(), storage.clone()).await;
    assert!(
        wait_until(
            || transport2.recorded_cursors() == vec![Some(1_000)],
            Duration::from_secs(5)
        )
        .await
    );
    // Give the replayed frames time to flow through before asserting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(storage.entity_count(), 2);
    assert_eq!(storage.marker_count(), 2);

    handle.shutdown().await.unwrap();
}

// ─── Drops never halt the stream ─────────────────────────────────────────────

#[tokio::test]
async fn bad_records_are_dropped_and_cursor_advances() {
    let storage = Arc::new(InMemoryStorage::new());

    let unknown_collection = commit_frame(
        "did:plc:alice",
        5,
        "app.bsky.feed.like",
        "x",
        "r1",
        "create",
        Some(&serde_json::json!({"subject": "y"})),
    );

    let transport = Arc::new(ScriptedTransport::new().session_hang(vec![
        Item::Frame(vec![0xff, 0x00, 0x13]), // undecodable garbage
        Item::Frame(unknown_collection),     // filter reject
        Item::Frame(post_frame("did:plc:alice", 7, "ok", "r1")),
    ]));
    let handle = spawn_connector(test_config(), transport, storage.clone()).await;

    assert!(
        wait_until(|| storage.active_entity_count() == 1, Duration::from_secs(5)).await,
        "valid record behind bad ones was never indexed"
    );

    // Rejected records were fully decided, so the cursor moved past them.
    let mut cursor = None;
    for _ in 0..200 {
        cursor = storage.load("jetindex").await.unwrap();
        if cursor == Some(7) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cursor, Some(7));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn out_of_order_sequences_keep_cursor_at_max() {
    let storage = Arc::new(InMemoryStorage::new());
    let transport = Arc::new(ScriptedTransport::new().session_hang(vec![
        Item::Frame(post_frame("did:plc:alice", 5, "a", "r1")),
        Item::Frame(post_frame("did:plc:alice", 3, "b", "r1")),
        Item::Frame(post_frame("did:plc:alice", 9, "c", "r1")),
    ]));
    let handle = spawn_connector(test_config(), transport, storage.clone()).await;

    assert!(wait_until(|| storage.active_entity_count() == 3, Duration::from_secs(5)).await);
    handle.shutdown().await.unwrap();

    assert_eq!(storage.load("jetindex").await.unwrap(), Some(9));
}

// ─── Backpressure ────────────────────────────────────────────────────────────

#[tokio::test]
async fn paused_queue_stops_transport_reads() {
    let storage = Arc::new(InMemoryStorage::new());
    let gated = Arc::new(GatedRepo::new(storage.clone()));

    let mut config = test_config();
    config.pause_at = 4;
    config.resume_at = 1;

    let frames: Vec<Item> = (0..20)
        .map(|i| Item::Frame(post_frame("did:plc:alice", i + 1, &format!("rk{i}"), "r1")))
        .collect();
    let transport = Arc::new(ScriptedTransport::new().session_hang(frames));

    let handle = Connector::new(
        config,
        transport.clone(),
        gated.clone(),
        storage.clone(),
        IndexerMetrics::global(),
    )
    .spawn()
    .await
    .unwrap();

    // With the consumer wedged, reads must stop at the pause threshold
    // (plus at most one in-flight item).
    tokio::time::sleep(Duration::from_millis(300)).await;
    let reads_when_paused = transport.frames_read.load(std::sync::atomic::Ordering::SeqCst);
    assert!(
        reads_when_paused <= 5,
        "reader kept reading while paused: {reads_when_paused} frames"
    );

    // Still no further reads while the pause holds.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        transport.frames_read.load(std::sync::atomic::Ordering::SeqCst),
        reads_when_paused
    );

    // Unblock the consumer; the queue drains, flow resumes, everything
    // lands.
    gated.release(10_000);
    assert!(
        wait_until(|| storage.active_entity_count() == 20, Duration::from_secs(5)).await,
        "queue never drained after resume"
    );
    assert_eq!(
        transport.frames_read.load(std::sync::atomic::Ordering::SeqCst),
        20
    );

    handle.shutdown().await.unwrap();
}

// ─── Failure escalation ──────────────────────────────────────────────────────

#[tokio::test]
async fn transient_exhaustion_reports_unhealthy() {
    let storage = Arc::new(InMemoryStorage::new());

    let mut config = test_config();
    config.persistence_max_retries = 1;
    config.persistence_initial_ms = 1;

    let transport = Arc::new(
        ScriptedTransport::new()
            .session_hang(vec![Item::Frame(post_frame("did:plc:alice", 1, "a", "r1"))]),
    );

    let handle = Connector::new(
        config,
        transport,
        Arc::new(AlwaysTransientRepo),
        storage,
        IndexerMetrics::global(),
    )
    .spawn()
    .await
    .unwrap();

    let state_watch = handle.state_watch();
    let result = handle.join().await;
    assert!(matches!(
        result,
        Err(IndexerError::RetriesExhausted { .. })
    ));
    assert_eq!(*state_watch.borrow(), ConnectorState::Failed);
}
