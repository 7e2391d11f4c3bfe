// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication cycle: fetch changes, reconcile every document, commit.
//!
//! # Algorithm
//!
//! 1. Read the start point from the checkpoint manager
//! 2. Fetch the remote change feed since that point
//! 3. Take a full local snapshot. Each local document claims (removes) its
//!    uuid's entry from the change set, then is classified and executed
//! 4. Whatever is left in the change set exists only remotely
//! 5. Commit the cycle record in one local write
//!
//! The partition in step 3 happens before any action runs, so every uuid is
//! owned by exactly one task and concurrent tasks never touch the same
//! document.
//!
//! # Failure Handling
//!
//! Document-scoped errors are logged, counted in `failed_documents`, and the
//! cycle moves on. Any other error stops new document work from starting,
//! lets in-flight work finish, skips the commit, and clears the continuation
//! flag so the scheduler halts.

use super::types::CyclePhase;
use crate::checkpoint::{CheckpointManager, CycleRecord};
use crate::classifier::SyncAction;
use crate::config::CycleConfig;
use crate::error::{ReplicationError, Result};
use crate::executor::{CycleCounters, DocumentTask, SyncExecutor};
use crate::metrics;
use crate::store::{ChangeSet, LocalStore, RemoteStore};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn, Instrument};

/// Runs cycles for one store pair, one at a time.
pub struct CycleRunner {
    replica_id: String,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    executor: SyncExecutor,
    checkpoints: CheckpointManager,
    config: CycleConfig,
    /// Serializes cycles and checkpoint resets
    cycle_lock: Mutex<()>,
    phase_tx: watch::Sender<CyclePhase>,
    last_cycle: RwLock<Option<CycleRecord>>,
    /// Cleared by a fatal cycle failure; the scheduler stops when it sees it
    keep_running: AtomicBool,
}

impl CycleRunner {
    pub fn new(
        replica_id: impl Into<String>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: CycleConfig,
    ) -> Self {
        let (phase_tx, _) = watch::channel(CyclePhase::Idle);
        Self {
            replica_id: replica_id.into(),
            executor: SyncExecutor::new(Arc::clone(&local), Arc::clone(&remote)),
            checkpoints: CheckpointManager::new(Arc::clone(&local)),
            local,
            remote,
            config,
            cycle_lock: Mutex::new(()),
            phase_tx,
            last_cycle: RwLock::new(None),
            keep_running: AtomicBool::new(false),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase_tx.borrow()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<CyclePhase> {
        self.phase_tx.subscribe()
    }

    pub async fn last_cycle(&self) -> Option<CycleRecord> {
        self.last_cycle.read().await.clone()
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Whether the scheduler should keep going.
    pub fn should_continue(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
    }

    pub fn set_continue(&self, keep_running: bool) {
        self.keep_running.store(keep_running, Ordering::SeqCst);
    }

    /// Run one cycle, waiting for any cycle already in progress.
    pub async fn run(&self) -> Result<CycleRecord> {
        let _guard = self.cycle_lock.lock().await;
        let span = tracing::info_span!("replication_cycle", replica = %self.replica_id);
        let started = Instant::now();

        match self.run_cycle().instrument(span).await {
            Ok(record) => {
                let duration = started.elapsed();
                self.set_phase(CyclePhase::Idle);
                metrics::record_cycle_complete(&record.counts, duration);

                let counts = &record.counts;
                if counts.is_quiet() {
                    debug!(
                        replica = %self.replica_id,
                        end_point = %record.end_point,
                        "Cycle complete, nothing to replicate"
                    );
                } else {
                    info!(
                        replica = %self.replica_id,
                        end_point = %record.end_point,
                        pushed = counts.remote_updates_made,
                        pulled = counts.local_updates_made,
                        remote_deletes = counts.remote_deletes_made,
                        local_deletes = counts.local_deletes_made,
                        conflicts = counts.found_conflicts,
                        failed = counts.failed_documents,
                        duration_ms = duration.as_millis() as u64,
                        "Cycle complete"
                    );
                }

                *self.last_cycle.write().await = Some(record.clone());
                Ok(record)
            }
            Err(e) => {
                self.set_phase(CyclePhase::Terminating);
                self.set_continue(false);
                metrics::record_cycle_failure(e.kind());
                error!(
                    replica = %self.replica_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Cycle aborted, checkpoint left at last good point"
                );
                Err(e)
            }
        }
    }

    /// Forget the replication point. Waits for a running cycle to finish.
    pub async fn reset_checkpoint(&self) -> Result<()> {
        let _guard = self.cycle_lock.lock().await;
        self.checkpoints.reset().await
    }

    async fn run_cycle(&self) -> Result<CycleRecord> {
        let started_at = chrono::Utc::now().timestamp_millis();
        let counters = CycleCounters::new();

        self.set_phase(CyclePhase::FetchingChanges);
        let start_point = self.checkpoints.last_point().await?;
        let ChangeSet {
            mut changes,
            next_checkpoint,
        } = self
            .remote
            .get_changes(start_point.as_deref())
            .await
            .map_err(|e| ReplicationError::from_store("remote.get_changes", e))?;
        counters
            .remote_changes_fetched
            .store(changes.len() as u64, Ordering::Relaxed);
        debug!(
            start_point = ?start_point,
            changes = changes.len(),
            "Fetched remote changes"
        );

        self.set_phase(CyclePhase::ProcessingLocal);
        let documents = self
            .local
            .get_all()
            .await
            .map_err(|e| ReplicationError::from_store("local.get_all", e))?;
        let local_tasks: Vec<DocumentTask> = documents
            .into_iter()
            .map(|doc| {
                let remote = changes.remove(&doc.uuid);
                DocumentTask::for_local(doc, remote)
            })
            .collect();
        self.execute_all(local_tasks, &counters).await?;

        self.set_phase(CyclePhase::ProcessingRemoteOnly);
        let remote_tasks: Vec<DocumentTask> = changes
            .into_iter()
            .map(|(uuid, change)| DocumentTask::for_remote_only(uuid, change))
            .collect();
        self.execute_all(remote_tasks, &counters).await?;

        self.set_phase(CyclePhase::PersistingCheckpoint);
        let record = CycleRecord {
            started_at,
            ended_at: chrono::Utc::now().timestamp_millis(),
            start_point,
            end_point: next_checkpoint,
            counts: counters.snapshot(),
        };
        self.checkpoints.commit(record.clone()).await?;
        Ok(record)
    }

    /// Execute tasks with at most `max_concurrent_documents` in flight.
    ///
    /// Returns the first fatal error after every started task has settled.
    async fn execute_all(&self, tasks: Vec<DocumentTask>, counters: &CycleCounters) -> Result<()> {
        let aborted = AtomicBool::new(false);
        let limit = self.config.max_concurrent_documents.max(1);

        let actionable = tasks
            .into_iter()
            .filter(|task| !matches!(task.action, SyncAction::Ignore | SyncAction::NoOp));

        let mut results = stream::iter(actionable)
            .map(|task| {
                let aborted = &aborted;
                async move {
                    // Futures start lazily, so this gate runs right before the op would
                    if aborted.load(Ordering::SeqCst) {
                        metrics::record_action(task.action.as_str(), "aborted");
                        return (task, None);
                    }
                    let result = self.executor.execute(&task, counters).await;
                    if matches!(&result, Err(e) if !e.is_document_scoped()) {
                        aborted.store(true, Ordering::SeqCst);
                    }
                    (task, Some(result))
                }
            })
            .buffer_unordered(limit);

        let mut fatal: Option<ReplicationError> = None;
        while let Some((task, result)) = results.next().await {
            match result {
                None | Some(Ok(())) => {}
                Some(Err(e)) if e.is_document_scoped() => {
                    counters.failed_documents.fetch_add(1, Ordering::Relaxed);
                    metrics::record_document_failure(e.kind());
                    warn!(
                        uuid = %task.uuid,
                        action = %task.action,
                        error = %e,
                        "Document skipped for this cycle"
                    );
                }
                Some(Err(e)) => {
                    if fatal.is_none() {
                        error!(
                            uuid = %task.uuid,
                            action = %task.action,
                            error = %e,
                            "Fatal error, no further documents will be started"
                        );
                        fatal = Some(e);
                    } else {
                        debug!(uuid = %task.uuid, error = %e, "Additional failure after abort");
                    }
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase_tx.send_replace(phase);
        metrics::set_cycle_phase(&phase.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::store::{DocumentStore, MemoryLocalStore, MemoryRemoteStore};
    use serde_json::json;

    fn runner(
        local: &Arc<MemoryLocalStore>,
        remote: &Arc<MemoryRemoteStore>,
        max_concurrent_documents: usize,
    ) -> CycleRunner {
        CycleRunner::new(
            "test",
            local.clone(),
            remote.clone(),
            CycleConfig {
                max_concurrent_documents,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_cycle_commits_checkpoint() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let runner = runner(&local, &remote, 1);

        let record = runner.run().await.unwrap();
        assert_eq!(record.start_point, None);
        assert_eq!(record.end_point, "0");
        assert!(record.counts.is_quiet());
        assert_eq!(runner.phase(), CyclePhase::Idle);
        assert_eq!(runner.last_cycle().await, Some(record));
    }

    #[tokio::test]
    async fn test_cycle_pushes_and_pulls() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        local.save(Document::new("a", json!({"x": 1}))).await.unwrap();
        remote.save(Document::new("c", json!({"z": 1}))).await.unwrap();

        let runner = runner(&local, &remote, 1);
        let record = runner.run().await.unwrap();

        assert_eq!(record.counts.remote_updates_made, 1);
        assert_eq!(record.counts.found_remote_creates, 1);
        assert!(remote.get("a").await.is_ok());
        assert_eq!(local.get("c").await.unwrap().payload, json!({"z": 1}));

        // Second cycle sees only the echo of our own push
        let record = runner.run().await.unwrap();
        assert!(record.counts.is_quiet());
        assert_eq!(record.start_point.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_fatal_error_clears_continue_flag() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let runner = runner(&local, &remote, 1);
        runner.set_continue(true);

        remote.set_offline(true);
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, ReplicationError::Transport { .. }));
        assert!(!runner.should_continue());
        assert_eq!(runner.phase(), CyclePhase::Terminating);
        assert_eq!(runner.checkpoints().last_point().await.unwrap(), None);
        assert!(runner.last_cycle().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_documents() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        for i in 0..20 {
            local
                .save(Document::new(format!("doc-{i}"), json!({"i": i})))
                .await
                .unwrap();
        }

        let runner = runner(&local, &remote, 8);
        let record = runner.run().await.unwrap();

        assert_eq!(record.counts.remote_updates_made, 20);
        assert_eq!(remote.save_count(), 20);
        let docs = local.get_all().await.unwrap();
        assert!(docs.iter().all(|d| !d.local_change && d.revision.is_some()));
    }

    #[tokio::test]
    async fn test_phase_receiver_sees_idle_after_cycle() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let runner = runner(&local, &remote, 1);
        let rx = runner.phase_receiver();

        runner.run().await.unwrap();
        assert_eq!(*rx.borrow(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_reset_checkpoint_between_cycles() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.save(Document::new("c", json!({}))).await.unwrap();
        let runner = runner(&local, &remote, 1);

        runner.run().await.unwrap();
        runner.reset_checkpoint().await.unwrap();

        let record = runner.run().await.unwrap();
        assert_eq!(record.start_point, None);
        // Everything re-read, nothing re-applied
        assert_eq!(record.counts.remote_changes_fetched, 1);
        assert!(record.counts.is_quiet());
        assert_eq!(runner.checkpoints().history().await.unwrap().len(), 2);
    }
}
