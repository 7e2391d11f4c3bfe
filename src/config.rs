//! Configuration for the replication engine.
//!
//! Configuration is passed to [`ReplicationEngine::new()`](crate::ReplicationEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use doc_replicator::config::ReplicationConfig;
//!
//! let config = ReplicationConfig {
//!     replica_id: "notes".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.settings.scheduler.interval().as_millis(), 60_000);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── replica_id: String            # Name of the replicated store pair (logs/metrics)
//! ├── settings: ReplicationSettings
//! │   ├── scheduler: SchedulerConfig # Timer-driven cycles
//! │   └── cycle: CycleConfig         # Per-cycle document processing
//! └── local_store: LocalStoreConfig  # SQLite local store location
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! replica_id: "notes"
//!
//! settings:
//!   scheduler:
//!     enabled: true
//!     interval: "60s"
//!   cycle:
//!     max_concurrent_documents: 8
//!
//! local_store:
//!   sqlite_path: "/var/lib/app/documents.db"
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default scheduler interval (60 000 ms).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Name of the replicated store pair. Shows up in logs and spans.
    pub replica_id: String,

    /// Scheduler and cycle tuning.
    #[serde(default)]
    pub settings: ReplicationSettings,

    /// Where [`SqliteLocalStore::from_config`](crate::store::SqliteLocalStore::from_config)
    /// keeps its database.
    #[serde(default)]
    pub local_store: LocalStoreConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replica_id: "default".to_string(),
            settings: ReplicationSettings::default(),
            local_store: LocalStoreConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(replica_id: &str) -> Self {
        Self {
            replica_id: replica_id.to_string(),
            settings: ReplicationSettings::default(),
            local_store: LocalStoreConfig::in_memory(),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.replica_id.trim().is_empty() {
            return Err(ReplicationError::Config("replica_id must not be empty".to_string()));
        }
        humantime::parse_duration(&self.settings.scheduler.interval).map_err(|e| {
            ReplicationError::Config(format!(
                "invalid scheduler interval {:?}: {}",
                self.settings.scheduler.interval, e
            ))
        })?;
        if self.settings.cycle.max_concurrent_documents == 0 {
            return Err(ReplicationError::Config(
                "max_concurrent_documents must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunable settings for the replication logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationSettings {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SchedulerConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Timer-driven replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether `start()` spawns the scheduler. When disabled the engine only
    /// replicates through `run_one_cycle()`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pause between the end of one cycle and the start of the next, as a
    /// duration string (e.g., "60s", "500ms").
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> String {
    "60s".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
        }
    }
}

impl SchedulerConfig {
    /// Parse the interval string to a Duration.
    pub fn interval(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(DEFAULT_INTERVAL)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CycleConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-cycle document processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Maximum documents processed concurrently within a cycle.
    /// `1` processes strictly sequentially.
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
}

fn default_max_concurrent_documents() -> usize {
    1
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: default_max_concurrent_documents(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LocalStoreConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// SQLite local store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Path to the SQLite database file, or `":memory:"`.
    pub sqlite_path: String,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "documents.db".to_string(),
        }
    }
}

impl LocalStoreConfig {
    /// In-memory database (for tests).
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
        }
    }
}
