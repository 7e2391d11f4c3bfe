//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Failure-injecting store wrappers that record calls
//! - Engine and document helpers

pub mod mock_stores;

pub use mock_stores::*;

use doc_replicator::store::{DocumentStore, LocalStore, MemoryRemoteStore, RemoteStore};
use doc_replicator::{Document, ReplicationConfig, ReplicationEngine};
use serde_json::Value;
use std::sync::Arc;

/// Config with the scheduler disabled; cycles run only on demand.
#[allow(dead_code)]
pub fn manual_config(replica_id: &str) -> ReplicationConfig {
    let mut config = ReplicationConfig::for_testing(replica_id);
    config.settings.scheduler.enabled = false;
    config
}

/// Engine over the given stores with a manual-only config.
#[allow(dead_code)]
pub fn engine<L: LocalStore, R: RemoteStore>(local: &Arc<L>, remote: &Arc<R>) -> ReplicationEngine {
    ReplicationEngine::new(manual_config("test"))
        .with_local_store(Arc::clone(local))
        .with_remote_store(Arc::clone(remote))
}

/// Save a document remotely and mirror it locally as already synced.
#[allow(dead_code)]
pub async fn seed_synced<L: LocalStore>(
    local: &L,
    remote: &MemoryRemoteStore,
    uuid: &str,
    payload: Value,
) -> Document {
    let saved = remote.save(Document::new(uuid, payload)).await.unwrap();
    local.save(saved.clone()).await.unwrap();
    saved
}

/// Have "someone else" write a new revision of `uuid` to the remote.
#[allow(dead_code)]
pub async fn remote_edit(remote: &MemoryRemoteStore, uuid: &str, payload: Value) -> Document {
    let current = remote.get(uuid).await.unwrap();
    remote
        .save(Document {
            payload,
            ..current
        })
        .await
        .unwrap()
}
