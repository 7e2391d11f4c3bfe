//! Store wrappers for failure injection.
//!
//! Both wrappers delegate to the in-memory reference stores and record every
//! call, so tests can assert on traffic as well as on end state.

#![allow(dead_code)]

use doc_replicator::store::{
    BoxFuture, ChangeSet, DocumentStore, LocalStore, MemoryLocalStore, MemoryRemoteStore,
    RemoteStore, StoreError,
};
use doc_replicator::{Document, ROOT_DOC_ID};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(String),
    Save(String),
    Delete(String),
    GetAll,
    GetChanges(Option<String>),
}

/// Local store that can be told to fail checkpoint writes or snapshots.
///
/// # Example
/// ```rust,ignore
/// let local = FlakyLocalStore::new();
/// local.fail_checkpoint_writes(true);
///
/// // Use in tests...
///
/// assert!(engine.run_one_cycle().await.is_err());
/// ```
pub struct FlakyLocalStore {
    inner: MemoryLocalStore,
    calls: RwLock<Vec<StoreCall>>,
    fail_root_saves: AtomicBool,
    fail_get_all: AtomicBool,
}

impl FlakyLocalStore {
    pub fn new() -> Self {
        Self::wrap(MemoryLocalStore::new())
    }

    pub fn wrap(inner: MemoryLocalStore) -> Self {
        Self {
            inner,
            calls: RwLock::new(Vec::new()),
            fail_root_saves: AtomicBool::new(false),
            fail_get_all: AtomicBool::new(false),
        }
    }

    /// Make every save of the checkpoint record fail with a backend error.
    pub fn fail_checkpoint_writes(&self, fail: bool) {
        self.fail_root_saves.store(fail, Ordering::SeqCst);
    }

    /// Make `get_all` fail with a backend error.
    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_get_all.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryLocalStore {
        &self.inner
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    async fn record(&self, call: StoreCall) {
        self.calls.write().await.push(call);
    }
}

impl DocumentStore for FlakyLocalStore {
    fn get(&self, uuid: &str) -> BoxFuture<'_, Document> {
        let uuid = uuid.to_string();
        Box::pin(async move {
            self.record(StoreCall::Get(uuid.clone())).await;
            self.inner.get(&uuid).await
        })
    }

    fn save(&self, document: Document) -> BoxFuture<'_, Document> {
        Box::pin(async move {
            self.record(StoreCall::Save(document.uuid.clone())).await;
            if document.uuid == ROOT_DOC_ID && self.fail_root_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            self.inner.save(document).await
        })
    }

    fn delete(&self, uuid: &str, expected_revision: Option<&str>) -> BoxFuture<'_, ()> {
        let uuid = uuid.to_string();
        let expected = expected_revision.map(str::to_string);
        Box::pin(async move {
            self.record(StoreCall::Delete(uuid.clone())).await;
            self.inner.delete(&uuid, expected.as_deref()).await
        })
    }
}

impl LocalStore for FlakyLocalStore {
    fn get_all(&self) -> BoxFuture<'_, Vec<Document>> {
        Box::pin(async move {
            self.record(StoreCall::GetAll).await;
            if self.fail_get_all.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("database is corrupted".to_string()));
            }
            self.inner.get_all().await
        })
    }
}

/// Remote store that goes offline after a configured number of saves.
pub struct FlakyRemoteStore {
    inner: Arc<MemoryRemoteStore>,
    calls: RwLock<Vec<StoreCall>>,
    /// Saves allowed before the connection "drops"
    fail_after_saves: AtomicUsize,
    save_attempts: AtomicUsize,
}

impl FlakyRemoteStore {
    pub fn new() -> Self {
        Self::wrap(Arc::new(MemoryRemoteStore::new()))
    }

    pub fn wrap(inner: Arc<MemoryRemoteStore>) -> Self {
        Self {
            inner,
            calls: RwLock::new(Vec::new()),
            fail_after_saves: AtomicUsize::new(usize::MAX),
            save_attempts: AtomicUsize::new(0),
        }
    }

    /// Let `n` saves through, then fail every later save as unavailable.
    pub fn fail_after_saves(&self, n: usize) {
        self.fail_after_saves.store(n, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &Arc<MemoryRemoteStore> {
        &self.inner
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    /// Number of save attempts, successful or not.
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    async fn record(&self, call: StoreCall) {
        self.calls.write().await.push(call);
    }
}

impl DocumentStore for FlakyRemoteStore {
    fn get(&self, uuid: &str) -> BoxFuture<'_, Document> {
        let uuid = uuid.to_string();
        Box::pin(async move {
            self.record(StoreCall::Get(uuid.clone())).await;
            self.inner.get(&uuid).await
        })
    }

    fn save(&self, document: Document) -> BoxFuture<'_, Document> {
        Box::pin(async move {
            self.record(StoreCall::Save(document.uuid.clone())).await;
            let attempt = self.save_attempts.fetch_add(1, Ordering::SeqCst);
            if attempt >= self.fail_after_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.save(document).await
        })
    }

    fn delete(&self, uuid: &str, expected_revision: Option<&str>) -> BoxFuture<'_, ()> {
        let uuid = uuid.to_string();
        let expected = expected_revision.map(str::to_string);
        Box::pin(async move {
            self.record(StoreCall::Delete(uuid.clone())).await;
            self.inner.delete(&uuid, expected.as_deref()).await
        })
    }
}

impl RemoteStore for FlakyRemoteStore {
    fn get_changes(&self, since: Option<&str>) -> BoxFuture<'_, ChangeSet> {
        let since = since.map(str::to_string);
        Box::pin(async move {
            self.record(StoreCall::GetChanges(since.clone())).await;
            self.inner.get_changes(since.as_deref()).await
        })
    }
}
