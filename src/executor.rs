// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync executor: carries out one classified action against the stores.
//!
//! Each action touches at most one uuid and performs its store calls in a
//! fixed order. The remote side is written first so a failure never leaves the
//! local record claiming a state the remote does not have.
//!
//! # Counting
//!
//! Counters are bumped only after the store confirmed the operation. A failed
//! action therefore never inflates `*_made`.
//!
//! # Error scoping
//!
//! | Failure | Result |
//! |---------|--------|
//! | stale revision on remote write | `StaleWrite`, flags unchanged, `found_conflicts` += 1 |
//! | document vanished | `NotFound` |
//! | guard violation | `Validation`, no store touched |
//! | remote unreachable / local backend | cycle-fatal |

use crate::checkpoint::CycleCounts;
use crate::classifier::{classify, classify_remote_only, SyncAction};
use crate::document::Document;
use crate::error::{ReplicationError, Result};
use crate::store::{LocalStore, RemoteChange, RemoteStore, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Live counters for a cycle in progress.
///
/// Shared by every in-flight document operation; turned into a
/// [`CycleCounts`] once the cycle settles.
#[derive(Debug, Default)]
pub struct CycleCounters {
    pub remote_changes_fetched: AtomicU64,
    pub found_local_updates: AtomicU64,
    pub found_local_deletes: AtomicU64,
    pub found_remote_updates: AtomicU64,
    pub found_remote_deletes: AtomicU64,
    pub found_remote_creates: AtomicU64,
    pub found_conflicts: AtomicU64,
    pub local_updates_made: AtomicU64,
    pub remote_updates_made: AtomicU64,
    pub remote_deletes_made: AtomicU64,
    pub local_deletes_made: AtomicU64,
    pub failed_documents: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl CycleCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CycleCounts {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CycleCounts {
            remote_changes_fetched: get(&self.remote_changes_fetched),
            found_local_updates: get(&self.found_local_updates),
            found_local_deletes: get(&self.found_local_deletes),
            found_remote_updates: get(&self.found_remote_updates),
            found_remote_deletes: get(&self.found_remote_deletes),
            found_remote_creates: get(&self.found_remote_creates),
            found_conflicts: get(&self.found_conflicts),
            local_updates_made: get(&self.local_updates_made),
            remote_updates_made: get(&self.remote_updates_made),
            remote_deletes_made: get(&self.remote_deletes_made),
            local_deletes_made: get(&self.local_deletes_made),
            failed_documents: get(&self.failed_documents),
        }
    }
}

/// One unit of work: a uuid, what each side knows about it, and the action
/// decided for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTask {
    pub uuid: String,
    pub local: Option<Document>,
    pub remote: Option<RemoteChange>,
    pub action: SyncAction,
}

impl DocumentTask {
    /// A local document, classified against its change-feed entry (if any).
    pub fn for_local(doc: Document, remote: Option<RemoteChange>) -> Self {
        let action = classify(&doc, remote.as_ref());
        Self {
            uuid: doc.uuid.clone(),
            local: Some(doc),
            remote,
            action,
        }
    }

    /// A change-feed entry with no local counterpart.
    pub fn for_remote_only(uuid: String, change: RemoteChange) -> Self {
        let action = classify_remote_only(&change);
        Self {
            uuid,
            local: None,
            remote: Some(change),
            action,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PullKind {
    Update,
    Create,
}

/// Executes classified actions against a local/remote store pair.
pub struct SyncExecutor {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
}

impl SyncExecutor {
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { local, remote }
    }

    /// Run the task's action. `Ignore` and `NoOp` return immediately.
    pub async fn execute(&self, task: &DocumentTask, counters: &CycleCounters) -> Result<()> {
        let result = match (task.action, task.local.as_ref()) {
            (SyncAction::Ignore | SyncAction::NoOp, _) => return Ok(()),
            (SyncAction::PropagateDelete, Some(doc)) => self.propagate_delete(doc, counters).await,
            (SyncAction::Conflict, Some(doc)) => {
                self.flag_conflict(doc, task.remote.as_ref(), counters).await
            }
            (SyncAction::PullRemoteUpdate, local) => {
                self.pull_remote(&task.uuid, local, PullKind::Update, counters).await
            }
            (SyncAction::PullRemoteCreate, local) => {
                self.pull_remote(&task.uuid, local, PullKind::Create, counters).await
            }
            (SyncAction::ApplyRemoteDelete, Some(doc)) => {
                self.apply_remote_delete(doc, counters).await
            }
            (SyncAction::PushLocalUpdate, Some(doc)) => self.push_local(doc, counters).await,
            (action, None) => Err(ReplicationError::Internal(format!(
                "{} requires a local document ({})",
                action, task.uuid
            ))),
        };

        let outcome = if result.is_ok() { "success" } else { "failed" };
        crate::metrics::record_action(task.action.as_str(), outcome);
        result
    }

    /// Delete remotely with the current revision, then delete locally.
    ///
    /// A document that never reached the remote is only deleted locally.
    pub async fn propagate_delete(&self, doc: &Document, counters: &CycleCounters) -> Result<()> {
        let Some(revision) = doc.revision.as_deref() else {
            self.delete_local(&doc.uuid, "local.delete_unsynced").await?;
            bump(&counters.found_local_deletes);
            bump(&counters.local_deletes_made);
            debug!(uuid = %doc.uuid, "Deleted never-synced document locally");
            return Ok(());
        };

        match self.remote.delete(&doc.uuid, Some(revision)).await {
            Ok(()) => bump(&counters.remote_deletes_made),
            Err(StoreError::NotFound(_)) => {
                debug!(uuid = %doc.uuid, "Remote copy already gone");
            }
            Err(StoreError::Conflict { uuid, message }) => {
                // Flag it and take the live revision so the retry is not stale again
                self.snapshot_and_pull(doc).await?;
                bump(&counters.found_conflicts);
                warn!(
                    uuid = %uuid,
                    revision = %revision,
                    "Remote rejected delete with stale revision, conflict flagged and delete intent kept"
                );
                return Err(ReplicationError::StaleWrite {
                    operation: "remote.delete".to_string(),
                    uuid,
                    message,
                });
            }
            Err(e) => return Err(ReplicationError::from_store("remote.delete", e)),
        }

        bump(&counters.found_local_deletes);
        self.delete_local(&doc.uuid, "local.delete").await?;
        bump(&counters.local_deletes_made);
        debug!(uuid = %doc.uuid, "Propagated local delete");
        Ok(())
    }

    /// Snapshot the local payload and take the remote state.
    ///
    /// An existing snapshot is kept. A document already flagged is only
    /// touched again when the remote moved past the revision it holds.
    pub async fn flag_conflict(
        &self,
        doc: &Document,
        remote: Option<&RemoteChange>,
        counters: &CycleCounters,
    ) -> Result<()> {
        let newer_remote = remote.is_some_and(|change| doc.revision_differs(&change.revision));
        if doc.has_conflict() && !newer_remote {
            debug!(uuid = %doc.uuid, "Conflict already flagged, awaiting resolution");
            return Ok(());
        }

        self.snapshot_and_pull(doc).await?;
        bump(&counters.found_conflicts);
        info!(uuid = %doc.uuid, "Conflict flagged, local payload kept as snapshot");
        Ok(())
    }

    /// Keep the local payload as the conflict snapshot and take the remote
    /// revision and payload. `local_delete` is carried over untouched.
    async fn snapshot_and_pull(&self, doc: &Document) -> Result<()> {
        let mut flagged = doc.clone();
        if flagged.conflict_payload.is_none() {
            flagged.conflict_payload = Some(doc.payload.clone());
        }

        match self.remote.get(&doc.uuid).await {
            Ok(remote_doc) => {
                flagged.revision = remote_doc.revision;
                flagged.payload = remote_doc.payload;
            }
            Err(StoreError::NotFound(_)) => {
                // Deleted remotely: keep our payload, forget the dead revision
                flagged.revision = None;
            }
            Err(e) => return Err(ReplicationError::from_store("remote.get", e)),
        }
        flagged.local_change = false;

        self.local
            .save(flagged)
            .await
            .map_err(|e| ReplicationError::from_store("local.save", e))?;
        Ok(())
    }

    async fn pull_remote(
        &self,
        uuid: &str,
        local: Option<&Document>,
        kind: PullKind,
        counters: &CycleCounters,
    ) -> Result<()> {
        if uuid.trim().is_empty() {
            return Err(ReplicationError::Validation(
                "cannot pull a document without a uuid".to_string(),
            ));
        }

        let remote_doc = self
            .remote
            .get(uuid)
            .await
            .map_err(|e| ReplicationError::from_store("remote.get", e))?;

        let mut doc = local.cloned().unwrap_or_else(|| Document::bare(uuid));
        doc.revision = remote_doc.revision;
        doc.payload = remote_doc.payload;
        doc.local_change = false;

        self.local
            .save(doc)
            .await
            .map_err(|e| ReplicationError::from_store("local.save", e))?;

        match kind {
            PullKind::Update => bump(&counters.found_remote_updates),
            PullKind::Create => bump(&counters.found_remote_creates),
        }
        bump(&counters.local_updates_made);
        debug!(uuid = %uuid, kind = ?kind, "Pulled remote document");
        Ok(())
    }

    /// Overwrite the local copy with the remote one (existing document).
    pub async fn pull_remote_update(
        &self,
        doc: &Document,
        counters: &CycleCounters,
    ) -> Result<()> {
        self.pull_remote(&doc.uuid, Some(doc), PullKind::Update, counters).await
    }

    /// Create the local copy of a document only the remote knows about.
    pub async fn pull_remote_create(&self, uuid: &str, counters: &CycleCounters) -> Result<()> {
        self.pull_remote(uuid, None, PullKind::Create, counters).await
    }

    /// Send local edits, then record the revision the remote assigned.
    pub async fn push_local(&self, doc: &Document, counters: &CycleCounters) -> Result<()> {
        if doc.has_conflict() {
            return Err(ReplicationError::Validation(format!(
                "refusing to push {}: unresolved conflict",
                doc.uuid
            )));
        }
        if doc.uuid.trim().is_empty() {
            return Err(ReplicationError::Validation(
                "cannot push a document without a uuid".to_string(),
            ));
        }

        let saved = match self.remote.save(doc.to_remote()).await {
            Ok(saved) => saved,
            Err(StoreError::Conflict { uuid, message }) => {
                bump(&counters.found_conflicts);
                warn!(
                    uuid = %uuid,
                    revision = ?doc.revision,
                    "Remote rejected push with stale revision, will reclassify next cycle"
                );
                return Err(ReplicationError::StaleWrite {
                    operation: "remote.save".to_string(),
                    uuid,
                    message,
                });
            }
            Err(e) => return Err(ReplicationError::from_store("remote.save", e)),
        };

        let mut updated = doc.clone();
        updated.revision = saved.revision;
        updated.local_change = false;
        self.local
            .save(updated)
            .await
            .map_err(|e| ReplicationError::from_store("local.save", e))?;

        bump(&counters.found_local_updates);
        bump(&counters.remote_updates_made);
        debug!(uuid = %doc.uuid, "Pushed local update");
        Ok(())
    }

    /// Drop the local copy of a document the remote deleted.
    pub async fn apply_remote_delete(
        &self,
        doc: &Document,
        counters: &CycleCounters,
    ) -> Result<()> {
        match self.local.delete(&doc.uuid, doc.revision.as_deref()).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(ReplicationError::from_store("local.delete", e)),
        }
        bump(&counters.found_remote_deletes);
        bump(&counters.local_deletes_made);
        debug!(uuid = %doc.uuid, "Applied remote delete");
        Ok(())
    }

    async fn delete_local(&self, uuid: &str, operation: &str) -> Result<()> {
        match self.local.delete(uuid, None).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(ReplicationError::from_store(operation, e)),
        }
    }
}
