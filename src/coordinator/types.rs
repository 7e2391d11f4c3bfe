//! Engine state types.
//!
//! Two state machines are tracked. [`EngineState`] is the engine lifecycle;
//! [`CyclePhase`] is where the current (or last) cycle is.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Running ──────────────┐
//!                               ↑   │                │
//!                     start()   │   │ cycle failed   │ shutdown()
//!                               │   ↓                ↓
//!                          Terminating ─────────→ Stopped
//!                                       shutdown()   │
//!                                                    │ start()
//!                                                    ↓
//!                                                 Running
//! ```
//!
//! # Cycle Phases
//!
//! ```text
//! Idle → FetchingChanges → ProcessingLocal → ProcessingRemoteOnly
//!      → PersistingCheckpoint → Idle
//!
//! any phase ──(fatal error)──→ Terminating
//! ```

use crate::checkpoint::CycleRecord;

/// State of the replication engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    ///
    /// Call [`start()`](super::ReplicationEngine::start) to begin replication.
    Created,

    /// Started. The scheduler (if enabled) keeps running cycles.
    Running,

    /// A cycle failed fatally. Scheduling has halted.
    ///
    /// The checkpoint still holds the last good point. Call `start()` again
    /// to resume from it.
    Terminating,

    /// Stopped.
    ///
    /// Engine has shut down cleanly. Safe to drop or restart.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Terminating => write!(f, "Terminating"),
            EngineState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Where a replication cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// No cycle running.
    Idle,
    /// Reading the remote change feed.
    FetchingChanges,
    /// Classifying and executing local documents.
    ProcessingLocal,
    /// Pulling documents only the remote knows about.
    ProcessingRemoteOnly,
    /// Writing the cycle record.
    PersistingCheckpoint,
    /// The last cycle failed fatally.
    Terminating,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::FetchingChanges => "fetching changes",
            CyclePhase::ProcessingLocal => "processing local documents",
            CyclePhase::ProcessingRemoteOnly => "processing remote-only documents",
            CyclePhase::PersistingCheckpoint => "persisting checkpoint",
            CyclePhase::Terminating => "terminating",
        };
        f.write_str(label)
    }
}

/// Snapshot returned by [`ReplicationEngine::status()`](super::ReplicationEngine::status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub phase: CyclePhase,
    /// Most recent successful cycle run by this engine instance.
    pub last_cycle: Option<CycleRecord>,
}
