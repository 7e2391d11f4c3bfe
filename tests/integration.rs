// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for the Document Replicator
//!
//! Every test wires a full engine to in-memory (or SQLite) stores and drives
//! it through public API only.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `scenario_*` - Single-document behaviours end to end
//! - `cycle_*` - Properties of whole cycles and the checkpoint
//! - `engine_*` - Lifecycle, scheduler, persistence across restarts

mod common;

use common::{engine, remote_edit, seed_synced};
use doc_replicator::store::{
    DocumentStore, LocalStore, MemoryLocalStore, MemoryRemoteStore, SqliteLocalStore,
};
use doc_replicator::{
    CyclePhase, Document, EngineState, ReplicationConfig, ReplicationEngine, ROOT_DOC_ID,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn stores() -> (Arc<MemoryLocalStore>, Arc<MemoryRemoteStore>) {
    (Arc::new(MemoryLocalStore::new()), Arc::new(MemoryRemoteStore::new()))
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_new_local_document_is_pushed() {
    let (local, remote) = stores();
    local.save(Document::new("a", json!({"x": 1}))).await.unwrap();

    let engine = engine(&local, &remote);
    let record = engine.run_one_cycle().await.unwrap();

    assert_eq!(remote.save_count(), 1);
    let doc = local.get("a").await.unwrap();
    assert!(doc.revision.is_some());
    assert!(!doc.local_change);
    assert_eq!(remote.get("a").await.unwrap().payload, json!({"x": 1}));
    assert_eq!(record.counts.found_local_updates, 1);
    assert_eq!(record.counts.remote_updates_made, 1);
}

#[tokio::test]
async fn scenario_conflicting_edit_is_flagged() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let mut doc = seed_synced(&*local, &remote, "b", json!({"v": "base"})).await;
    engine.run_one_cycle().await.unwrap();

    let theirs = remote_edit(&remote, "b", json!({"v": "theirs"})).await;
    doc.edit(json!({"v": "mine"})).unwrap();
    local.save(doc).await.unwrap();

    let record = engine.run_one_cycle().await.unwrap();

    let stored = local.get("b").await.unwrap();
    assert_eq!(stored.conflict_payload, Some(json!({"v": "mine"})));
    assert_eq!(stored.payload, json!({"v": "theirs"}));
    assert_eq!(stored.revision, theirs.revision);
    assert!(!stored.local_change);
    assert_eq!(record.counts.found_conflicts, 1);
    // Nothing was pushed over the remote edit
    assert_eq!(remote.get("b").await.unwrap().payload, json!({"v": "theirs"}));
}

#[tokio::test]
async fn scenario_remote_only_document_is_created_locally() {
    let (local, remote) = stores();
    let created = remote.save(Document::new("c", json!({"z": 1}))).await.unwrap();

    let engine = engine(&local, &remote);
    let record = engine.run_one_cycle().await.unwrap();

    let stored = local.get("c").await.unwrap();
    assert_eq!(stored.payload, json!({"z": 1}));
    assert_eq!(stored.revision, created.revision);
    assert_eq!(record.counts.found_remote_creates, 1);
    assert_eq!(record.counts.local_updates_made, 1);
}

#[tokio::test]
async fn scenario_stale_delete_keeps_intent_and_cycle_continues() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let mut doomed = seed_synced(&*local, &remote, "d", json!({"v": 1})).await;
    engine.run_one_cycle().await.unwrap();

    // Remote moves on while we hold a pending delete
    remote_edit(&remote, "d", json!({"v": 2})).await;
    doomed.mark_deleted().unwrap();
    local.save(doomed).await.unwrap();
    local.save(Document::new("e", json!({"other": true}))).await.unwrap();

    let record = engine.run_one_cycle().await.unwrap();

    let stored = local.get("d").await.unwrap();
    assert!(stored.local_delete);
    assert!(remote.get("d").await.is_ok());
    assert_eq!(record.counts.found_conflicts, 1);
    assert_eq!(record.counts.failed_documents, 1);
    assert_eq!(record.counts.remote_deletes_made, 0);

    // The other document was still processed
    assert!(remote.get("e").await.is_ok());
    assert!(!local.get("e").await.unwrap().local_change);
}

#[tokio::test]
async fn scenario_stale_delete_flags_then_converges() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let mut doomed = seed_synced(&*local, &remote, "d", json!({"v": 1})).await;
    engine.run_one_cycle().await.unwrap();

    remote_edit(&remote, "d", json!({"v": 2})).await;
    doomed.mark_deleted().unwrap();
    local.save(doomed).await.unwrap();

    // Rejected once: flagged with the remote state, intent kept
    let record = engine.run_one_cycle().await.unwrap();
    assert_eq!(record.counts.found_conflicts, 1);
    assert_eq!(record.counts.failed_documents, 1);
    let stored = local.get("d").await.unwrap();
    assert!(stored.local_delete);
    assert_eq!(stored.conflict_payload, Some(json!({"v": 1})));
    assert_eq!(stored.payload, json!({"v": 2}));
    assert_eq!(stored.revision, remote.get("d").await.unwrap().revision);

    // The retry carries the live revision and goes through
    let record = engine.run_one_cycle().await.unwrap();
    assert_eq!(record.counts.remote_deletes_made, 1);
    assert_eq!(record.counts.local_deletes_made, 1);
    assert_eq!(record.counts.found_conflicts, 0);
    assert_eq!(record.counts.failed_documents, 0);
    assert!(local.get("d").await.is_err());
    assert!(remote.get("d").await.is_err());

    let record = engine.run_one_cycle().await.unwrap();
    assert!(record.counts.is_quiet());
}

#[tokio::test]
async fn scenario_local_delete_propagates() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let mut doc = seed_synced(&*local, &remote, "d", json!({})).await;
    engine.run_one_cycle().await.unwrap();

    doc.mark_deleted().unwrap();
    local.save(doc).await.unwrap();
    let record = engine.run_one_cycle().await.unwrap();

    assert!(local.get("d").await.is_err());
    assert!(remote.get("d").await.is_err());
    assert_eq!(record.counts.remote_deletes_made, 1);

    // The tombstone echo is a no-op
    let record = engine.run_one_cycle().await.unwrap();
    assert!(record.counts.is_quiet());
}

#[tokio::test]
async fn scenario_remote_delete_is_applied() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let doc = seed_synced(&*local, &remote, "r", json!({})).await;
    engine.run_one_cycle().await.unwrap();

    remote.delete("r", doc.revision.as_deref()).await.unwrap();
    let record = engine.run_one_cycle().await.unwrap();

    assert!(local.get("r").await.is_err());
    assert_eq!(record.counts.found_remote_deletes, 1);
    assert_eq!(record.counts.local_deletes_made, 1);
}

#[tokio::test]
async fn scenario_resolved_conflict_is_pushed() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let mut doc = seed_synced(&*local, &remote, "b", json!({"v": "base"})).await;
    engine.run_one_cycle().await.unwrap();
    remote_edit(&remote, "b", json!({"v": "theirs"})).await;
    doc.edit(json!({"v": "mine"})).unwrap();
    local.save(doc).await.unwrap();
    engine.run_one_cycle().await.unwrap();

    // Still flagged: further cycles leave it alone
    let record = engine.run_one_cycle().await.unwrap();
    assert!(record.counts.is_quiet());
    let mut flagged = local.get("b").await.unwrap();
    assert!(flagged.edit(json!({"v": "sneaky"})).is_err());

    let snapshot = flagged.resolve_conflict(json!({"v": "merged"}));
    assert_eq!(snapshot, Some(json!({"v": "mine"})));
    local.save(flagged).await.unwrap();

    let record = engine.run_one_cycle().await.unwrap();
    assert_eq!(record.counts.remote_updates_made, 1);
    assert_eq!(remote.get("b").await.unwrap().payload, json!({"v": "merged"}));
    let stored = local.get("b").await.unwrap();
    assert!(!stored.has_conflict());
    assert!(!stored.local_change);
}

// =============================================================================
// Cycle Properties
// =============================================================================

#[tokio::test]
async fn cycle_noop_is_idempotent() {
    let (local, remote) = stores();
    local.save(Document::new("a", json!({"x": 1}))).await.unwrap();
    remote.save(Document::new("c", json!({"z": 1}))).await.unwrap();
    let engine = engine(&local, &remote);

    engine.run_one_cycle().await.unwrap();
    // Settle the echo of our own push
    engine.run_one_cycle().await.unwrap();
    let before = local.get_all().await.unwrap();

    let record = engine.run_one_cycle().await.unwrap();
    assert!(record.counts.is_quiet());
    assert_eq!(record.counts.remote_changes_fetched, 0);
    assert_eq!(record.start_point.as_deref(), Some(record.end_point.as_str()));

    // Only the root record changed
    let after = local.get_all().await.unwrap();
    let user_docs = |docs: &[Document]| -> Vec<Document> {
        docs.iter().filter(|d| d.uuid != ROOT_DOC_ID).cloned().collect()
    };
    assert_eq!(user_docs(&before), user_docs(&after));
}

#[tokio::test]
async fn cycle_round_trip_between_replicas() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let laptop = Arc::new(MemoryLocalStore::new());
    let phone = Arc::new(MemoryLocalStore::new());

    let payload = json!({"title": "groceries", "items": ["milk", "eggs"]});
    laptop.save(Document::new("list", payload.clone())).await.unwrap();

    engine(&laptop, &remote).run_one_cycle().await.unwrap();
    engine(&phone, &remote).run_one_cycle().await.unwrap();

    let pulled = phone.get("list").await.unwrap();
    assert_eq!(pulled.payload, payload);
    assert!(!pulled.local_change);
    assert_eq!(pulled.revision, laptop.get("list").await.unwrap().revision);
}

#[tokio::test]
async fn cycle_checkpoint_is_monotonic() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let mut end_points = Vec::new();
    for i in 0..5 {
        remote
            .save(Document::new(format!("remote-{i}"), json!({"i": i})))
            .await
            .unwrap();
        let record = engine.run_one_cycle().await.unwrap();
        end_points.push(record.end_point);
    }

    let history = engine.checkpoint_history().await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(
        history.iter().map(|c| c.end_point.clone()).collect::<Vec<_>>(),
        end_points
    );
    for pair in history.windows(2) {
        assert_eq!(pair[1].start_point.as_deref(), Some(pair[0].end_point.as_str()));
    }

    let root = local.get(ROOT_DOC_ID).await.unwrap();
    assert_eq!(root.payload["last_replication_point"], json!(end_points[4]));
}

#[tokio::test]
async fn cycle_root_record_is_never_replicated() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    engine.run_one_cycle().await.unwrap();
    engine.run_one_cycle().await.unwrap();

    assert!(local.get(ROOT_DOC_ID).await.is_ok());
    assert!(remote.get(ROOT_DOC_ID).await.is_err());
    assert_eq!(remote.save_count(), 0);
}

#[tokio::test]
async fn cycle_reset_checkpoint_rereads_without_reapplying() {
    let (local, remote) = stores();
    remote.save(Document::new("c", json!({}))).await.unwrap();
    let engine = engine(&local, &remote);

    engine.run_one_cycle().await.unwrap();
    engine.reset_checkpoint().await.unwrap();
    let record = engine.run_one_cycle().await.unwrap();

    assert_eq!(record.start_point, None);
    assert_eq!(record.counts.remote_changes_fetched, 1);
    assert!(record.counts.is_quiet());
}

// =============================================================================
// Engine Lifecycle
// =============================================================================

#[tokio::test]
async fn engine_scheduler_replicates_until_shutdown() {
    let (local, remote) = stores();
    local.save(Document::new("a", json!({"x": 1}))).await.unwrap();

    let mut config = ReplicationConfig::for_testing("scheduled");
    config.settings.scheduler.interval = "20ms".to_string();
    let mut engine = ReplicationEngine::new(config)
        .with_local_store(local.clone())
        .with_remote_store(remote.clone());

    engine.start().await.unwrap();
    assert!(engine.is_running());

    // Something written while running is picked up by a later cycle
    tokio::time::sleep(Duration::from_millis(60)).await;
    local.save(Document::new("b", json!({"y": 2}))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    engine.shutdown().await;
    assert_eq!(engine.state(), EngineState::Stopped);

    assert!(remote.get("a").await.is_ok());
    assert!(remote.get("b").await.is_ok());
    let history = engine.checkpoint_history().await.unwrap();
    assert!(history.len() >= 3, "expected several cycles, got {}", history.len());

    // No cycle starts after shutdown
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(engine.checkpoint_history().await.unwrap().len(), history.len());
}

#[tokio::test]
async fn engine_status_reports_phase_and_last_cycle() {
    let (local, remote) = stores();
    let engine = engine(&local, &remote);

    let status = engine.status().await;
    assert_eq!(status.state, EngineState::Created);
    assert_eq!(status.last_cycle, None);

    let record = engine.run_one_cycle().await.unwrap();
    let status = engine.status().await;
    assert_eq!(status.phase, CyclePhase::Idle);
    assert_eq!(status.phase.to_string(), "idle");
    assert_eq!(status.last_cycle, Some(record));
}

#[tokio::test]
async fn engine_sqlite_store_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("replica.db");
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.save(Document::new("c", json!({"z": 1}))).await.unwrap();

    {
        let local = Arc::new(SqliteLocalStore::new(&db_path).await.unwrap());
        local.save(Document::new("a", json!({"x": 1}))).await.unwrap();

        let engine = engine(&local, &remote);
        let record = engine.run_one_cycle().await.unwrap();
        assert_eq!(record.counts.remote_updates_made, 1);
        assert_eq!(record.counts.found_remote_creates, 1);
        local.close().await;
    }

    let local = Arc::new(SqliteLocalStore::new(&db_path).await.unwrap());
    assert_eq!(local.get("c").await.unwrap().payload, json!({"z": 1}));
    assert!(!local.get("a").await.unwrap().local_change);

    // Resumes from the persisted checkpoint: only the push echo is new
    let engine = engine(&local, &remote);
    let record = engine.run_one_cycle().await.unwrap();
    assert_eq!(record.start_point.as_deref(), Some("1"));
    assert!(record.counts.is_quiet());
    assert_eq!(engine.checkpoint_history().await.unwrap().len(), 2);
    local.close().await;
}
