// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The main orchestrator that ties together:
//! - The local and remote stores via [`crate::store`]
//! - Cycle execution via [`CycleRunner`]
//! - Checkpoint persistence via [`crate::checkpoint::CheckpointManager`]
//! - The timer-driven scheduler
//!
//! # Architecture
//!
//! The coordinator manages the full replication lifecycle:
//! 1. Validates configuration and both stores on `start()`
//! 2. Spawns the scheduler, which runs a cycle immediately and then one per interval
//! 3. Serializes manual cycles (`run_one_cycle()`) and checkpoint resets with
//!    scheduled ones
//! 4. Moves to `Terminating` when a cycle fails fatally; `start()` resumes
//!    from the last committed checkpoint

mod cycle;
mod scheduler;
mod types;

pub use cycle::CycleRunner;
pub use types::{CyclePhase, EngineState, EngineStatus};

use crate::checkpoint::CycleRecord;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::store::{LocalStore, RemoteStore};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The main replication engine.
///
/// Replicates one local store against one remote store. Both stores are
/// supplied by the application before `start()`.
///
/// # Example
///
/// ```rust,no_run
/// use doc_replicator::{ReplicationConfig, ReplicationEngine};
/// use doc_replicator::store::{MemoryLocalStore, MemoryRemoteStore};
/// use std::sync::Arc;
///
/// # async fn example() -> doc_replicator::Result<()> {
/// let mut engine = ReplicationEngine::new(ReplicationConfig::for_testing("notes"))
///     .with_local_store(Arc::new(MemoryLocalStore::new()))
///     .with_remote_store(Arc::new(MemoryRemoteStore::new()));
///
/// engine.start().await?;
/// let status = engine.status().await;
/// println!("{} / {}", status.state, status.phase);
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ReplicationEngine {
    /// Configuration
    config: ReplicationConfig,

    local: Option<Arc<dyn LocalStore>>,
    remote: Option<Arc<dyn RemoteStore>>,

    /// Engine state (broadcast to watchers)
    state_tx: Arc<watch::Sender<EngineState>>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,

    /// Built on first use, once both stores are known
    runner: OnceLock<Arc<CycleRunner>>,

    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,

    /// Scheduler task handle
    scheduler_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ReplicationEngine {
    /// Create a new replication engine.
    ///
    /// The engine starts in `Created` state. Attach both stores, then call
    /// [`start()`](Self::start) or [`run_one_cycle()`](Self::run_one_cycle).
    pub fn new(config: ReplicationConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            local: None,
            remote: None,
            state_tx: Arc::new(state_tx),
            state_rx,
            runner: OnceLock::new(),
            shutdown_tx,
            shutdown_rx,
            scheduler_handle: None,
        }
    }

    /// Attach the local store.
    pub fn with_local_store<L: LocalStore>(mut self, local: Arc<L>) -> Self {
        let local: Arc<dyn LocalStore> = local;
        self.local = Some(local);
        self
    }

    /// Attach the remote store.
    pub fn with_remote_store<R: RemoteStore>(mut self, remote: Arc<R>) -> Self {
        let remote: Arc<dyn RemoteStore> = remote;
        self.remote = Some(remote);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Get a receiver to watch cycle phase changes.
    pub fn phase_receiver(&self) -> Result<watch::Receiver<CyclePhase>> {
        Ok(self.runner()?.phase_receiver())
    }

    /// Check if engine is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// Current state, cycle phase, and the most recent successful cycle.
    ///
    /// Performs no store I/O.
    pub async fn status(&self) -> EngineStatus {
        let (phase, last_cycle) = match self.runner.get() {
            Some(runner) => (runner.phase(), runner.last_cycle().await),
            None => (CyclePhase::Idle, None),
        };
        EngineStatus {
            state: self.state(),
            phase,
            last_cycle,
        }
    }

    /// Start the replication engine.
    ///
    /// 1. Checks both stores are attached and the configuration is valid
    /// 2. Re-arms the continuation flag (restart after `Terminating`)
    /// 3. Spawns the scheduler (if enabled)
    pub async fn start(&mut self) -> Result<()> {
        if self.state() == EngineState::Running {
            return Err(ReplicationError::InvalidState {
                expected: "Created, Terminating or Stopped".to_string(),
                actual: self.state().to_string(),
            });
        }

        self.config.validate()?;
        let runner = self.runner()?;

        // A scheduler left over from before a failure may still be sleeping
        if let Some(handle) = self.scheduler_handle.take() {
            let _ = self.shutdown_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Previous scheduler task panicked");
            }
        }

        info!(
            replica = %self.config.replica_id,
            scheduler = self.config.settings.scheduler.enabled,
            interval = %self.config.settings.scheduler.interval,
            "Starting replication engine"
        );

        runner.set_continue(true);
        let _ = self.shutdown_tx.send(false);
        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");

        if self.config.settings.scheduler.enabled {
            self.spawn_scheduler(runner);
        } else {
            debug!("Scheduler disabled, cycles only run on demand");
        }

        info!(replica = %self.config.replica_id, "Replication engine running");
        Ok(())
    }

    /// Spawn the scheduler task.
    fn spawn_scheduler(&mut self, runner: Arc<CycleRunner>) {
        let interval = self.config.settings.scheduler.interval();
        let shutdown_rx = self.shutdown_rx.clone();
        let state_tx = Arc::clone(&self.state_tx);

        let handle = tokio::spawn(async move {
            scheduler::run_scheduler(runner, interval, shutdown_rx, state_tx).await;
        });

        info!("Spawned replication scheduler");
        self.scheduler_handle = Some(handle);
    }

    /// Run one cycle now, waiting for any cycle already in progress.
    ///
    /// A fatal failure halts the scheduler just like a scheduled cycle would.
    pub async fn run_one_cycle(&self) -> Result<CycleRecord> {
        let runner = self.runner()?;
        let result = runner.run().await;
        if result.is_err() {
            scheduler::mark_terminating(&self.state_tx);
        }
        result
    }

    /// Make the next cycle start from the beginning of the change feed.
    pub async fn reset_checkpoint(&self) -> Result<()> {
        self.runner()?.reset_checkpoint().await
    }

    /// Every committed cycle, oldest first.
    pub async fn checkpoint_history(&self) -> Result<Vec<CycleRecord>> {
        self.runner()?.checkpoints().history().await
    }

    /// Shutdown the replication engine gracefully.
    ///
    /// No new cycle starts after this is called. A cycle already running is
    /// allowed to finish (and commit) before the scheduler exits.
    pub async fn shutdown(&mut self) {
        info!(replica = %self.config.replica_id, "Shutting down replication engine");

        // Signal shutdown to the scheduler
        let _ = self.shutdown_tx.send(true);
        if let Some(runner) = self.runner.get() {
            runner.set_continue(false);
        }

        if let Some(handle) = self.scheduler_handle.take() {
            match handle.await {
                Ok(()) => debug!("Scheduler completed gracefully"),
                Err(e) => warn!(error = %e, "Scheduler panicked during shutdown"),
            }
        }

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!("Replication engine stopped");
    }

    fn runner(&self) -> Result<Arc<CycleRunner>> {
        if let Some(runner) = self.runner.get() {
            return Ok(Arc::clone(runner));
        }

        let local = self
            .local
            .clone()
            .ok_or_else(|| ReplicationError::Config("local store is not configured".to_string()))?;
        let remote = self
            .remote
            .clone()
            .ok_or_else(|| ReplicationError::Config("remote store is not configured".to_string()))?;

        let runner = self.runner.get_or_init(|| {
            Arc::new(CycleRunner::new(
                self.config.replica_id.clone(),
                local,
                remote,
                self.config.settings.cycle.clone(),
            ))
        });
        Ok(Arc::clone(runner))
    }
}
