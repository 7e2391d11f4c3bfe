//! Document records, the unit of replication.
//!
//! A [`Document`] carries its replication bookkeeping alongside the
//! application payload:
//!
//! - `revision` is the last server state we know of (`None` until first sync)
//! - `local_change` / `local_delete` record pending local intent
//! - `conflict_payload` holds the user's edit that lost a race with a remote
//!   change, and blocks further edits until the conflict is resolved
//!
//! The engine treats `payload` as opaque JSON.

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved identity of the checkpoint (root) record in the local store.
///
/// Never used by application documents; the classifier ignores it.
pub const ROOT_DOC_ID: &str = "_local/replication_root";

/// A replicated document.
///
/// The conflict guard lives on the document, not in the stores:
/// [`edit`](Self::edit) and [`mark_deleted`](Self::mark_deleted) fail while
/// `conflict_payload` is set, but a raw [`DocumentStore::save`] writes
/// whatever it is given. Application writes should go through
/// [`update_document`], which applies the change to the stored record.
///
/// [`DocumentStore::save`]: crate::store::DocumentStore::save
/// [`update_document`]: crate::store::update_document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identity shared by the local and remote copies.
    pub uuid: String,
    /// Last-known server revision. `None` for documents never synced.
    #[serde(default)]
    pub revision: Option<String>,
    /// Application content.
    #[serde(default)]
    pub payload: Value,
    /// Payload modified locally since the last sync.
    #[serde(default)]
    pub local_change: bool,
    /// Marked for deletion locally.
    #[serde(default)]
    pub local_delete: bool,
    /// Snapshot of the local payload taken when a conflict was detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_payload: Option<Value>,
}

impl Document {
    /// A new local document with a pending change (first local save).
    pub fn new(uuid: impl Into<String>, payload: Value) -> Self {
        Self {
            uuid: uuid.into(),
            revision: None,
            payload,
            local_change: true,
            local_delete: false,
            conflict_payload: None,
        }
    }

    /// A new local document with a freshly generated time-ordered identity.
    pub fn create(payload: Value) -> Self {
        Self::new(uuid::Uuid::now_v7().to_string(), payload)
    }

    /// A bare record: identity only, no payload, no pending flags.
    ///
    /// Used when a `get` reports NotFound and the caller needs something to
    /// fill in.
    pub fn bare(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            revision: None,
            payload: Value::Null,
            local_change: false,
            local_delete: false,
            conflict_payload: None,
        }
    }

    /// A document as the remote store holds it.
    pub fn remote(uuid: impl Into<String>, revision: impl Into<String>, payload: Value) -> Self {
        Self {
            revision: Some(revision.into()),
            payload,
            ..Self::bare(uuid)
        }
    }

    /// Whether this is the reserved checkpoint record.
    pub fn is_root(&self) -> bool {
        self.uuid == ROOT_DOC_ID
    }

    /// Whether an unresolved conflict is attached.
    pub fn has_conflict(&self) -> bool {
        self.conflict_payload.is_some()
    }

    /// Whether the local revision differs from `other`.
    pub fn revision_differs(&self, other: &str) -> bool {
        self.revision.as_deref() != Some(other)
    }

    /// Replace the payload and mark the document as locally changed.
    ///
    /// Fails while a conflict is pending; use
    /// [`resolve_conflict`](Self::resolve_conflict) instead.
    pub fn edit(&mut self, payload: Value) -> Result<()> {
        self.ensure_no_conflict("edit")?;
        self.payload = payload;
        self.local_change = true;
        Ok(())
    }

    /// Mark the document for deletion on the next cycle.
    pub fn mark_deleted(&mut self) -> Result<()> {
        self.ensure_no_conflict("delete")?;
        self.local_delete = true;
        Ok(())
    }

    /// Acknowledge a conflict and store the reconciled payload.
    ///
    /// Clears `conflict_payload` and marks the document as locally changed so
    /// the next cycle pushes `payload` against the revision pulled at conflict
    /// time. Returns the snapshot that was cleared.
    pub fn resolve_conflict(&mut self, payload: Value) -> Option<Value> {
        let snapshot = self.conflict_payload.take();
        self.payload = payload;
        self.local_change = true;
        snapshot
    }

    /// The representation sent to the remote store: identity plus payload.
    pub fn to_remote(&self) -> Document {
        Document {
            uuid: self.uuid.clone(),
            revision: self.revision.clone(),
            payload: self.payload.clone(),
            local_change: false,
            local_delete: false,
            conflict_payload: None,
        }
    }

    fn ensure_no_conflict(&self, operation: &str) -> Result<()> {
        if self.has_conflict() {
            return Err(ReplicationError::Validation(format!(
                "cannot {} {}: unresolved conflict",
                operation, self.uuid
            )));
        }
        Ok(())
    }
}
