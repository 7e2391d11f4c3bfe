//! # Document Replicator
//!
//! Offline-first replication of JSON documents between a local store and a
//! remote store.
//!
//! ## Architecture
//!
//! The engine sits between an always-available local store and a remote store
//! reachable only over the network, and reconciles the two in cycles:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            doc-replicator                                 │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │ RemoteStore │───►│  CycleRunner │───►│ classify → SyncExecutor      │  │
//! │  │ (changes)   │    │ (partition)  │    │ (push / pull / delete / flag)│  │
//! │  └─────────────┘    └──────────────┘    └──────────────────────────────┘  │
//! │         ▲                  │                         │                    │
//! │         │                  ▼                         ▼                    │
//! │  ┌─────────────┐    ┌──────────────────┐     ┌──────────────┐             │
//! │  │  Scheduler  │    │ CheckpointManager│────►│  LocalStore  │             │
//! │  │ (interval)  │    │ (root record)    │     │ (SQLite/mem) │             │
//! │  └─────────────┘    └──────────────────┘     └──────────────┘             │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One Cycle
//!
//! 1. **Fetch**: read the remote change feed since the last checkpoint
//! 2. **Reconcile**: classify every local document, then every remote-only change
//! 3. **Commit**: append the cycle record and move the checkpoint, in one write
//!
//! A failed cycle commits nothing, so the next one re-reads the same changes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use doc_replicator::{ReplicationConfig, ReplicationEngine};
//! use doc_replicator::store::{MemoryRemoteStore, SqliteLocalStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> doc_replicator::Result<()> {
//!     let config = ReplicationConfig::default();
//!     let local = SqliteLocalStore::from_config(&config.local_store).await?;
//!
//!     let mut engine = ReplicationEngine::new(config)
//!         .with_local_store(Arc::new(local))
//!         .with_remote_store(Arc::new(MemoryRemoteStore::new()));
//!     engine.start().await?;
//!
//!     // Engine runs until shutdown signal
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod store;

// Re-exports for convenience
pub use checkpoint::{CheckpointManager, CheckpointRecord, CycleCounts, CycleRecord};
pub use classifier::{classify, classify_remote_only, SyncAction};
pub use config::{CycleConfig, LocalStoreConfig, ReplicationConfig, ReplicationSettings, SchedulerConfig};
pub use coordinator::{CyclePhase, EngineState, EngineStatus, ReplicationEngine};
pub use document::{Document, ROOT_DOC_ID};
pub use error::{ReplicationError, Result};
pub use executor::{CycleCounters, DocumentTask, SyncExecutor};
pub use store::{
    update_document, ChangeSet, DocumentStore, LocalStore, RemoteChange, RemoteStore, StoreError,
};
