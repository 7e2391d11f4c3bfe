//! Change classification.
//!
//! Maps a local document and the remote change feed's view of it onto exactly
//! one [`SyncAction`]. Pure: no I/O, no clock, no randomness.
//!
//! Rules are evaluated in priority order, first match wins:
//!
//! | # | Condition | Action |
//! |---|-----------|--------|
//! | 1 | reserved root record | `Ignore` |
//! | 2 | `local_delete` | `PropagateDelete` |
//! | 3 | conflict pending, or local change and remote revision differs | `Conflict` |
//! | 4 | remote revision differs | `PullRemoteUpdate` (`ApplyRemoteDelete` for a tombstone) |
//! | 5 | `local_change` | `PushLocalUpdate` |
//! | 6 | otherwise | `NoOp` |
//!
//! A local delete always wins so a delete intent is never lost. A two-sided
//! edit is flagged before either a blind push (clobbers the remote edit) or a
//! blind pull (discards the local one) can happen.

use crate::document::Document;
use crate::store::RemoteChange;

/// What to do with one document in this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    /// Reserved record, not replicated.
    Ignore,
    /// Delete remotely, then locally.
    PropagateDelete,
    /// Both sides changed: snapshot local payload, take the remote one.
    Conflict,
    /// Remote has a newer revision of a document we hold.
    PullRemoteUpdate,
    /// Remote deleted a document we hold unchanged.
    ApplyRemoteDelete,
    /// Local edits to send.
    PushLocalUpdate,
    /// Remote document we have never seen.
    PullRemoteCreate,
    /// Nothing to do.
    NoOp,
}

impl SyncAction {
    /// Metric/log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::PropagateDelete => "propagate_delete",
            Self::Conflict => "conflict",
            Self::PullRemoteUpdate => "pull_remote_update",
            Self::ApplyRemoteDelete => "apply_remote_delete",
            Self::PushLocalUpdate => "push_local_update",
            Self::PullRemoteCreate => "pull_remote_create",
            Self::NoOp => "noop",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a local document against the remote change reported for its uuid.
pub fn classify(doc: &Document, remote: Option<&RemoteChange>) -> SyncAction {
    if doc.is_root() {
        return SyncAction::Ignore;
    }

    if doc.local_delete {
        return SyncAction::PropagateDelete;
    }

    let remote_differs = remote.filter(|change| doc.revision_differs(&change.revision));

    if doc.has_conflict() || (doc.local_change && remote_differs.is_some()) {
        return SyncAction::Conflict;
    }

    if let Some(change) = remote_differs {
        return if change.deleted {
            SyncAction::ApplyRemoteDelete
        } else {
            SyncAction::PullRemoteUpdate
        };
    }

    if doc.local_change {
        return SyncAction::PushLocalUpdate;
    }

    SyncAction::NoOp
}

/// Classify a change-feed entry that matched no local document.
pub fn classify_remote_only(remote: &RemoteChange) -> SyncAction {
    if remote.deleted {
        // Created and deleted remotely while we weren't looking
        SyncAction::NoOp
    } else {
        SyncAction::PullRemoteCreate
    }
}
