//! Fuzz target for revision generation.
//!
//! Previous revisions come back from remote stores and may be malformed.
//! Generation must never panic and must always yield a well-formed revision.

#![no_main]

use doc_replicator::store::memory::next_revision;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (Option<&str>, &str)| {
    let (previous, content) = data;
    let payload = serde_json::Value::String(content.to_string());

    let next = next_revision(previous, &payload);

    let (generation, hash) = next.split_once('-').expect("revision has a generation");
    let generation: u64 = generation.parse().expect("generation is numeric");
    assert!(generation >= 1);
    assert_eq!(hash.len(), 16);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

    // Deterministic for the same input
    assert_eq!(next, next_revision(previous, &payload));
});
