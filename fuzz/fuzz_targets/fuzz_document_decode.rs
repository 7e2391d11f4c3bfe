//! Fuzz target for document and checkpoint record decoding.
//!
//! Arbitrary bytes from a store must never panic the decoder or the
//! classifier, and a decoded document must classify to a single action.

#![no_main]

use doc_replicator::store::RemoteChange;
use doc_replicator::{classify, CheckpointRecord, Document, SyncAction};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&[u8], &str, bool)| {
    let (bytes, revision, deleted) = data;

    // Checkpoint records come from the same store and may be corrupted too
    let _ = serde_json::from_slice::<CheckpointRecord>(bytes);

    let Ok(doc) = serde_json::from_slice::<Document>(bytes) else {
        return;
    };

    let change = RemoteChange {
        revision: revision.to_string(),
        deleted,
    };
    let with_remote = classify(&doc, Some(&change));
    let without_remote = classify(&doc, None);

    if doc.is_root() {
        assert_eq!(with_remote, SyncAction::Ignore);
    } else if doc.local_delete {
        assert_eq!(with_remote, SyncAction::PropagateDelete);
        assert_eq!(without_remote, SyncAction::PropagateDelete);
    }

    // Only the change feed can produce a pull
    assert_ne!(without_remote, SyncAction::PullRemoteUpdate);
    assert_ne!(without_remote, SyncAction::ApplyRemoteDelete);
});
