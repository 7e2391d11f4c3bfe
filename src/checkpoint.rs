// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint persistence for replication progress.
//!
//! The checkpoint is a single root record kept in the *local* store under
//! [`ROOT_DOC_ID`]. It holds the change-feed token of the last successful
//! cycle plus an append-only history of cycle records.
//!
//! # Semantics
//!
//! - The record is loaded once and cached for the lifetime of the manager.
//! - [`commit()`](CheckpointManager::commit) writes the new point and the
//!   appended history in one local-store write, and only updates the cache
//!   after that write succeeds. A failed commit leaves both disk and cache at
//!   the last good point.
//! - Nothing is written incrementally during a cycle. A crash mid-cycle means
//!   the next cycle re-reads the same changes; the classifier sees documents
//!   already settled as no-ops.
//!
//! ```text
//! get_changes(point) → process documents → commit(end_point)
//!                      (crash here = same point next time, no double apply)
//! ```

use crate::document::{Document, ROOT_DOC_ID};
use crate::error::{ReplicationError, Result};
use crate::store::{DocumentStore, LocalStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Counters describing one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounts {
    /// Entries returned by the change feed.
    #[serde(default)]
    pub remote_changes_fetched: u64,
    pub found_local_updates: u64,
    pub found_local_deletes: u64,
    pub found_remote_updates: u64,
    pub found_remote_deletes: u64,
    pub found_remote_creates: u64,
    pub found_conflicts: u64,
    pub local_updates_made: u64,
    pub remote_updates_made: u64,
    pub remote_deletes_made: u64,
    #[serde(default)]
    pub local_deletes_made: u64,
    /// Documents whose action failed and were skipped for this cycle.
    #[serde(default)]
    pub failed_documents: u64,
}

impl CycleCounts {
    /// True when the cycle changed nothing on either side.
    pub fn is_quiet(&self) -> bool {
        let quiet = Self {
            remote_changes_fetched: self.remote_changes_fetched,
            ..Self::default()
        };
        *self == quiet
    }
}

/// One replication cycle, as recorded in the checkpoint history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Unix milliseconds.
    pub started_at: i64,
    /// Unix milliseconds.
    pub ended_at: i64,
    /// Change-feed token the cycle started from (`None` = beginning).
    pub start_point: Option<String>,
    /// Change-feed token returned by the remote for this cycle.
    pub end_point: String,
    #[serde(default)]
    pub counts: CycleCounts,
}

/// The persisted root record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// End point of the most recent successful cycle.
    pub last_replication_point: Option<String>,
    /// Every committed cycle, oldest first.
    #[serde(default)]
    pub history: Vec<CycleRecord>,
}

/// Owns the checkpoint record: load once, commit once per cycle.
pub struct CheckpointManager {
    local: Arc<dyn LocalStore>,
    cache: RwLock<Option<CheckpointRecord>>,
}

impl CheckpointManager {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self {
            local,
            cache: RwLock::new(None),
        }
    }

    /// The cached record, loading it from the local store on first use.
    pub async fn load(&self) -> Result<CheckpointRecord> {
        if let Some(record) = self.cache.read().await.as_ref() {
            return Ok(record.clone());
        }

        let mut cache = self.cache.write().await;
        // Another caller may have loaded it while we waited for the lock
        if let Some(record) = cache.as_ref() {
            return Ok(record.clone());
        }

        let record = match self.local.get(ROOT_DOC_ID).await {
            Ok(doc) => serde_json::from_value::<CheckpointRecord>(doc.payload)?,
            Err(StoreError::NotFound(_)) => {
                debug!("No checkpoint record, replicating from the beginning");
                CheckpointRecord::default()
            }
            Err(e) => return Err(ReplicationError::from_store("local.get_checkpoint", e)),
        };

        if let Some(point) = &record.last_replication_point {
            info!(
                point = %point,
                cycles = record.history.len(),
                "Restored checkpoint from previous run"
            );
        }

        *cache = Some(record.clone());
        Ok(record)
    }

    /// Point the next cycle starts from. `None` means "from the beginning".
    pub async fn last_point(&self) -> Result<Option<String>> {
        Ok(self.load().await?.last_replication_point)
    }

    /// All committed cycles, oldest first.
    pub async fn history(&self) -> Result<Vec<CycleRecord>> {
        Ok(self.load().await?.history)
    }

    /// Record a successful cycle: move the point to its end point and append
    /// it to the history, in a single local write.
    pub async fn commit(&self, cycle: CycleRecord) -> Result<()> {
        let mut next = self.load().await?;
        next.last_replication_point = Some(cycle.end_point.clone());
        next.history.push(cycle);

        self.persist(&next).await?;
        crate::metrics::record_checkpoint_commit(true);

        debug!(
            point = ?next.last_replication_point,
            cycles = next.history.len(),
            "Checkpoint committed"
        );
        *self.cache.write().await = Some(next);
        Ok(())
    }

    /// Forget the replication point so the next cycle starts from the
    /// beginning. History and document flags are left alone.
    pub async fn reset(&self) -> Result<()> {
        let mut next = self.load().await?;
        next.last_replication_point = None;

        self.persist(&next).await?;
        *self.cache.write().await = Some(next);
        info!("Checkpoint reset, next cycle replicates from the beginning");
        Ok(())
    }

    async fn persist(&self, record: &CheckpointRecord) -> Result<()> {
        let doc = Document {
            payload: serde_json::to_value(record)?,
            ..Document::bare(ROOT_DOC_ID)
        };
        self.local.save(doc).await.map_err(|e| {
            crate::metrics::record_checkpoint_commit(false);
            ReplicationError::from_store("local.save_checkpoint", e)
        })?;
        Ok(())
    }
}
