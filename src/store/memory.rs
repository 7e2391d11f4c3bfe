//! In-memory store implementations.
//!
//! [`MemoryLocalStore`] is a plain ordered map. [`MemoryRemoteStore`] behaves
//! like a small document database: it assigns revisions, enforces optimistic
//! concurrency on writes, and keeps a sequence-numbered change log that backs
//! [`RemoteStore::get_changes`]. It can be switched offline to simulate a
//! dropped connection.

use super::{BoxFuture, ChangeSet, DocumentStore, LocalStore, RemoteChange, RemoteStore, StoreError, StoreResult};
use crate::document::Document;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

// ═══════════════════════════════════════════════════════════════════════════════
// Local
// ═══════════════════════════════════════════════════════════════════════════════

/// Local store backed by an in-memory ordered map.
#[derive(Default)]
pub struct MemoryLocalStore {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with documents.
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let docs = documents
            .into_iter()
            .map(|doc| (doc.uuid.clone(), doc))
            .collect();
        Self {
            docs: RwLock::new(docs),
        }
    }

    /// Number of stored documents (root record included).
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

impl DocumentStore for MemoryLocalStore {
    fn get(&self, uuid: &str) -> BoxFuture<'_, Document> {
        let uuid = uuid.to_string();
        Box::pin(async move {
            self.docs
                .read()
                .await
                .get(&uuid)
                .cloned()
                .ok_or(StoreError::NotFound(uuid))
        })
    }

    fn save(&self, document: Document) -> BoxFuture<'_, Document> {
        Box::pin(async move {
            self.docs
                .write()
                .await
                .insert(document.uuid.clone(), document.clone());
            Ok(document)
        })
    }

    fn delete(&self, uuid: &str, expected_revision: Option<&str>) -> BoxFuture<'_, ()> {
        let uuid = uuid.to_string();
        let expected = expected_revision.map(str::to_string);
        Box::pin(async move {
            let mut docs = self.docs.write().await;
            let current = docs
                .get(&uuid)
                .ok_or_else(|| StoreError::NotFound(uuid.clone()))?;
            if let Some(expected) = expected {
                if current.revision.as_deref() != Some(expected.as_str()) {
                    return Err(StoreError::Conflict {
                        uuid,
                        message: format!(
                            "expected revision {}, found {:?}",
                            expected, current.revision
                        ),
                    });
                }
            }
            docs.remove(&uuid);
            Ok(())
        })
    }
}

impl LocalStore for MemoryLocalStore {
    fn get_all(&self) -> BoxFuture<'_, Vec<Document>> {
        Box::pin(async move { Ok(self.docs.read().await.values().cloned().collect()) })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Remote
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct LogEntry {
    seq: u64,
    uuid: String,
    change: RemoteChange,
}

#[derive(Default)]
struct RemoteState {
    /// Live documents
    docs: HashMap<String, Document>,
    /// Last revision of deleted documents (so a re-create keeps counting up)
    tombstones: HashMap<String, String>,
    /// Append-only change log
    log: Vec<LogEntry>,
    /// Last assigned sequence number
    seq: u64,
}

impl RemoteState {
    fn append(&mut self, uuid: &str, change: RemoteChange) {
        self.seq += 1;
        self.log.push(LogEntry {
            seq: self.seq,
            uuid: uuid.to_string(),
            change,
        });
    }
}

/// Remote store simulation with revisions and a sequence-numbered change feed.
///
/// Revisions look like `"{generation}-{content hash prefix}"`. Checkpoint
/// tokens are the decimal sequence number of the last change included.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: RwLock<RemoteState>,
    offline: AtomicBool,
    saves: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection.
    ///
    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of successful `delete` calls.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Current sequence number (the checkpoint a fully caught-up reader holds).
    pub async fn current_sequence(&self) -> u64 {
        self.state.read().await.seq
    }

    /// Live document count.
    pub async fn len(&self) -> usize {
        self.state.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.docs.is_empty()
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.is_offline() {
            return Err(StoreError::Unavailable("remote store is offline".to_string()));
        }
        Ok(())
    }
}

/// Compute the revision following `previous` for the given payload.
pub fn next_revision(previous: Option<&str>, payload: &Value) -> String {
    let generation = previous
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(generation, _)| generation.parse::<u64>().ok())
        .unwrap_or(0)
        .saturating_add(1);
    let digest = Sha256::digest(payload.to_string().as_bytes());
    format!("{}-{}", generation, hex::encode(&digest[..8]))
}

impl DocumentStore for MemoryRemoteStore {
    fn get(&self, uuid: &str) -> BoxFuture<'_, Document> {
        let uuid = uuid.to_string();
        Box::pin(async move {
            self.ensure_online()?;
            self.state
                .read()
                .await
                .docs
                .get(&uuid)
                .cloned()
                .ok_or(StoreError::NotFound(uuid))
        })
    }

    fn save(&self, document: Document) -> BoxFuture<'_, Document> {
        Box::pin(async move {
            self.ensure_online()?;
            let mut state = self.state.write().await;

            // A revision only matches a live document; deleted or unknown never does
            let live = state.docs.get(&document.uuid).map(|existing| existing.revision.clone());
            let matches = match (&live, &document.revision) {
                (Some(current), expected) => current == expected,
                (None, expected) => expected.is_none(),
            };
            if !matches {
                return Err(StoreError::Conflict {
                    uuid: document.uuid.clone(),
                    message: format!(
                        "expected revision {:?}, found {:?}",
                        document.revision,
                        live.as_ref().and_then(|current| current.as_deref())
                    ),
                });
            }
            let previous = match live {
                Some(current) => current,
                None => state.tombstones.get(&document.uuid).cloned(),
            };

            let revision = next_revision(previous.as_deref(), &document.payload);
            let stored = Document::remote(document.uuid.clone(), revision.clone(), document.payload);

            state.tombstones.remove(&stored.uuid);
            state.docs.insert(stored.uuid.clone(), stored.clone());
            state.append(&stored.uuid, RemoteChange::updated(revision));
            self.saves.fetch_add(1, Ordering::SeqCst);

            Ok(stored)
        })
    }

    fn delete(&self, uuid: &str, expected_revision: Option<&str>) -> BoxFuture<'_, ()> {
        let uuid = uuid.to_string();
        let expected = expected_revision.map(str::to_string);
        Box::pin(async move {
            self.ensure_online()?;
            let mut state = self.state.write().await;

            let current = state
                .docs
                .get(&uuid)
                .and_then(|doc| doc.revision.clone())
                .ok_or_else(|| StoreError::NotFound(uuid.clone()))?;

            if let Some(expected) = expected {
                if expected != current {
                    return Err(StoreError::Conflict {
                        uuid,
                        message: format!("expected revision {}, found {}", expected, current),
                    });
                }
            }

            let tombstone = next_revision(Some(&current), &Value::Null);
            state.docs.remove(&uuid);
            state.tombstones.insert(uuid.clone(), tombstone.clone());
            state.append(&uuid, RemoteChange::deleted(tombstone));
            self.deletes.fetch_add(1, Ordering::SeqCst);

            Ok(())
        })
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn get_changes(&self, since: Option<&str>) -> BoxFuture<'_, ChangeSet> {
        let since = since.map(str::to_string);
        Box::pin(async move {
            self.ensure_online()?;
            let since = match since {
                Some(token) => token.parse::<u64>().map_err(|_| {
                    StoreError::Backend(format!("invalid checkpoint token: {}", token))
                })?,
                None => 0,
            };

            let state = self.state.read().await;
            // Later entries overwrite earlier ones: latest change per uuid wins
            let changes = state
                .log
                .iter()
                .filter(|entry| entry.seq > since)
                .map(|entry| (entry.uuid.clone(), entry.change.clone()))
                .collect();

            Ok(ChangeSet {
                changes,
                next_checkpoint: state.seq.to_string(),
            })
        })
    }
}
