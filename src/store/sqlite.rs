// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed local document store.
//!
//! Documents live in a single `documents` table keyed by uuid; payloads are
//! stored as JSON text. The checkpoint record is just another row (under
//! [`ROOT_DOC_ID`](crate::document::ROOT_DOC_ID)), so a checkpoint commit is a
//! single upsert.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended (e.g. the application writes while a cycle runs). Writes are
//! retried with exponential backoff, up to [`SQLITE_RETRY_MAX_ATTEMPTS`].

use super::{BoxFuture, DocumentStore, LocalStore, StoreError, StoreResult};
use crate::config::LocalStoreConfig;
use crate::document::Document;
use crate::error::{ReplicationError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts per write before a busy database is reported as a backend error.
pub const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY: Duration = Duration::from_millis(10);
const SQLITE_RETRY_MAX_DELAY: Duration = Duration::from_millis(500);

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6): another writer holds the database.
fn is_contention(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = e else {
        return false;
    };
    match db_err.code() {
        Some(code) => matches!(code.as_ref(), "5" | "6"),
        None => {
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}

/// Run a document write, backing off while the database is contended.
async fn with_busy_retry<F, Fut, T>(op: &str, mut write: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delay = SQLITE_RETRY_BASE_DELAY;
    let mut attempt: u32 = 1;
    loop {
        match write().await {
            Err(e) if is_contention(&e) && attempt < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(op, attempt, delay_ms = delay.as_millis() as u64, "Local store busy, backing off");
                crate::metrics::record_store_retry(op);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(SQLITE_RETRY_MAX_DELAY);
                attempt += 1;
            }
            Ok(value) if attempt > 1 => {
                debug!(op, attempt, "Local store write landed after backoff");
                return Ok(value);
            }
            other => return other,
        }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

type DocumentRow = (String, Option<String>, String, bool, bool, Option<String>);

fn row_to_document(row: DocumentRow) -> StoreResult<Document> {
    let (uuid, revision, payload, local_change, local_delete, conflict_payload) = row;
    let payload = serde_json::from_str(&payload)
        .map_err(|e| StoreError::Backend(format!("corrupt payload for {}: {}", uuid, e)))?;
    let conflict_payload = conflict_payload
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| StoreError::Backend(format!("corrupt conflict payload for {}: {}", uuid, e)))?;
    Ok(Document {
        uuid,
        revision,
        payload,
        local_change,
        local_delete,
        conflict_payload,
    })
}

/// Local document store persisted in SQLite (WAL mode).
pub struct SqliteLocalStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteLocalStore {
    /// Open (or create) a store at the given path.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Opening SQLite local store");

        let in_memory = path_str == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path_str)
        };

        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| ReplicationError::Config(format!("Invalid SQLite path: {}", e)))?
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // Each in-memory connection is a separate database: pin to one, forever
        let mut pool_options = SqlitePoolOptions::new().max_connections(4);
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                uuid TEXT PRIMARY KEY,
                revision TEXT,
                payload TEXT NOT NULL,
                local_change INTEGER NOT NULL DEFAULT 0,
                local_delete INTEGER NOT NULL DEFAULT 0,
                conflict_payload TEXT,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            path: path_str,
        })
    }

    /// Open the store described by `config`.
    pub async fn from_config(config: &LocalStoreConfig) -> Result<Self> {
        Self::new(&config.sqlite_path).await
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(path = %self.path, "SQLite local store closed");
    }
}

impl DocumentStore for SqliteLocalStore {
    fn get(&self, uuid: &str) -> BoxFuture<'_, Document> {
        let uuid = uuid.to_string();
        Box::pin(async move {
            let row: Option<DocumentRow> = sqlx::query_as(
                "SELECT uuid, revision, payload, local_change, local_delete, conflict_payload \
                 FROM documents WHERE uuid = ?",
            )
            .bind(&uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

            match row {
                Some(row) => row_to_document(row),
                None => Err(StoreError::NotFound(uuid)),
            }
        })
    }

    fn save(&self, document: Document) -> BoxFuture<'_, Document> {
        Box::pin(async move {
            let payload = document.payload.to_string();
            let conflict_payload = document.conflict_payload.as_ref().map(|value| value.to_string());
            let now = chrono::Utc::now().timestamp_millis();
            let pool = &self.pool;

            with_busy_retry("document_save", || async {
                sqlx::query(
                    r#"
                    INSERT INTO documents
                        (uuid, revision, payload, local_change, local_delete, conflict_payload, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(uuid) DO UPDATE SET
                        revision = excluded.revision,
                        payload = excluded.payload,
                        local_change = excluded.local_change,
                        local_delete = excluded.local_delete,
                        conflict_payload = excluded.conflict_payload,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&document.uuid)
                .bind(&document.revision)
                .bind(&payload)
                .bind(document.local_change)
                .bind(document.local_delete)
                .bind(&conflict_payload)
                .bind(now)
                .execute(pool)
                .await
            })
            .await
            .map_err(backend)?;

            Ok(document)
        })
    }

    fn delete(&self, uuid: &str, expected_revision: Option<&str>) -> BoxFuture<'_, ()> {
        let uuid = uuid.to_string();
        let expected = expected_revision.map(str::to_string);
        Box::pin(async move {
            let pool = &self.pool;
            let result = with_busy_retry("document_delete", || async {
                match &expected {
                    Some(revision) => {
                        sqlx::query("DELETE FROM documents WHERE uuid = ? AND revision = ?")
                            .bind(&uuid)
                            .bind(revision)
                            .execute(pool)
                            .await
                    }
                    None => {
                        sqlx::query("DELETE FROM documents WHERE uuid = ?")
                            .bind(&uuid)
                            .execute(pool)
                            .await
                    }
                }
            })
            .await
            .map_err(backend)?;

            if result.rows_affected() > 0 {
                return Ok(());
            }

            // Nothing deleted: tell a missing row apart from a revision mismatch
            match self.get(&uuid).await {
                Ok(current) => Err(StoreError::Conflict {
                    uuid,
                    message: format!(
                        "expected revision {:?}, found {:?}",
                        expected, current.revision
                    ),
                }),
                Err(e) => Err(e),
            }
        })
    }
}

impl LocalStore for SqliteLocalStore {
    fn get_all(&self) -> BoxFuture<'_, Vec<Document>> {
        Box::pin(async move {
            let rows: Vec<DocumentRow> = sqlx::query_as(
                "SELECT uuid, revision, payload, local_change, local_delete, conflict_payload \
                 FROM documents ORDER BY uuid",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

            rows.into_iter().map(row_to_document).collect()
        })
    }
}
