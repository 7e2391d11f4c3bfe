// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store integration traits.
//!
//! The engine talks to both sides of a replicated pair through these traits.
//! The application supplies the concrete backends; this crate ships
//! reference implementations in [`memory`] and [`sqlite`].
//!
//! # Example
//!
//! ```rust,no_run
//! use doc_replicator::store::{BoxFuture, DocumentStore, LocalStore, StoreError};
//! use doc_replicator::Document;
//!
//! struct MyBackend { /* ... */ }
//!
//! impl DocumentStore for MyBackend {
//!     fn get(&self, uuid: &str) -> BoxFuture<'_, Document> {
//!         let uuid = uuid.to_string();
//!         Box::pin(async move { Err(StoreError::NotFound(uuid)) })
//!     }
//!
//!     fn save(&self, document: Document) -> BoxFuture<'_, Document> {
//!         Box::pin(async move { Ok(document) })
//!     }
//!
//!     fn delete(&self, _uuid: &str, _expected_revision: Option<&str>) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//!
//! impl LocalStore for MyBackend {
//!     fn get_all(&self) -> BoxFuture<'_, Vec<Document>> {
//!         Box::pin(async move { Ok(Vec::new()) })
//!     }
//! }
//! ```

pub mod memory;
pub mod sqlite;

use crate::document::Document;
use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub use memory::{MemoryLocalStore, MemoryRemoteStore};
pub use sqlite::SqliteLocalStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Errors a store implementation reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No document with this uuid.
    #[error("not found: {0}")]
    NotFound(String),

    /// The supplied revision does not match the stored one.
    #[error("revision conflict on {uuid}: {message}")]
    Conflict { uuid: String, message: String },

    /// The store cannot be reached (network down, server unavailable).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Latest state of one document as reported by the remote change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Latest remote revision.
    pub revision: String,
    /// The latest change was a deletion (tombstone).
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteChange {
    /// A live revision.
    pub fn updated(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            deleted: false,
        }
    }

    /// A deletion tombstone.
    pub fn deleted(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            deleted: true,
        }
    }
}

/// Result of a change-feed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// uuid → latest change, for every document changed after the requested point.
    pub changes: BTreeMap<String, RemoteChange>,
    /// Checkpoint token to pass to the next query.
    pub next_checkpoint: String,
}

/// Operations shared by the local and remote stores.
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch a document. Missing documents are [`StoreError::NotFound`].
    fn get(&self, uuid: &str) -> BoxFuture<'_, Document>;

    /// Persist a document.
    ///
    /// Remote stores check `document.revision` against the stored revision
    /// and return the document with its newly assigned revision.
    fn save(&self, document: Document) -> BoxFuture<'_, Document>;

    /// Delete a document, using `expected_revision` as the optimistic
    /// concurrency token when given.
    fn delete(&self, uuid: &str, expected_revision: Option<&str>) -> BoxFuture<'_, ()>;
}

/// The local side: fast, always available, enumerable.
pub trait LocalStore: DocumentStore {
    /// Full snapshot of every stored document, the root record included.
    fn get_all(&self) -> BoxFuture<'_, Vec<Document>>;
}

/// The remote side: reachable only over the network, exposes a change feed.
pub trait RemoteStore: DocumentStore {
    /// Changes strictly after `since`. `None` means "everything".
    fn get_changes(&self, since: Option<&str>) -> BoxFuture<'_, ChangeSet>;
}

/// Read-modify-write of a stored document under the conflict guard.
///
/// `change` runs against the *stored* record, so an application holding a
/// copy from before a conflict was flagged cannot overwrite the snapshot:
/// [`Document::edit`] and [`Document::mark_deleted`] refuse a conflicted
/// record, and only [`Document::resolve_conflict`] clears it.
///
/// ```rust,ignore
/// update_document(&*local, "a", |doc| doc.edit(json!({"v": 2}))).await?;
/// ```
pub async fn update_document<L, F>(local: &L, uuid: &str, change: F) -> Result<Document>
where
    L: LocalStore + ?Sized,
    F: FnOnce(&mut Document) -> Result<()>,
{
    let mut doc = local
        .get(uuid)
        .await
        .map_err(|e| ReplicationError::from_store("local.get", e))?;
    change(&mut doc)?;
    local
        .save(doc)
        .await
        .map_err(|e| ReplicationError::from_store("local.save", e))
}
