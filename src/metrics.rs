//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Cycle outcomes and durations
//! - Classified actions and per-document failures
//! - Checkpoint commits
//! - Local store retries
//! - Engine state and cycle phase
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! Without an installed recorder every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use doc_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_action("push_local_update", "success");
//! metrics::record_cycle_failure("transport");
//! ```

use crate::checkpoint::CycleCounts;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a completed cycle and its counters.
pub fn record_cycle_complete(counts: &CycleCounts, duration: Duration) {
    counter!("replication_cycles_total", "status" => "success").increment(1);
    histogram!("replication_cycle_duration_seconds").record(duration.as_secs_f64());
    histogram!("replication_cycle_remote_changes").record(counts.remote_changes_fetched as f64);

    counter!("replication_local_updates_made_total").increment(counts.local_updates_made);
    counter!("replication_remote_updates_made_total").increment(counts.remote_updates_made);
    counter!("replication_remote_deletes_made_total").increment(counts.remote_deletes_made);
    counter!("replication_local_deletes_made_total").increment(counts.local_deletes_made);
    counter!("replication_conflicts_total").increment(counts.found_conflicts);
}

/// Record a cycle that aborted.
pub fn record_cycle_failure(error_kind: &str) {
    counter!("replication_cycles_total", "status" => "failure").increment(1);
    counter!("replication_cycle_errors_total", "error_type" => error_kind.to_string()).increment(1);
}

/// Record one executed action and its outcome (`success`, `failed`, `aborted`).
pub fn record_action(action: &str, outcome: &str) {
    counter!(
        "replication_actions_total",
        "action" => action.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a per-document failure that was isolated from the rest of the cycle.
pub fn record_document_failure(error_kind: &str) {
    counter!("replication_document_failures_total", "error_type" => error_kind.to_string()).increment(1);
}

/// Record a checkpoint write.
pub fn record_checkpoint_commit(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_checkpoint_commits_total", "status" => status).increment(1);
}

/// Record a local store retry (SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_store_retry(operation: &str) {
    counter!("replication_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "Terminating" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}

/// Gauge for the current cycle phase.
pub fn set_cycle_phase(phase: &str) {
    let value = match phase {
        "idle" => 0.0,
        "fetching changes" => 1.0,
        "processing local documents" => 2.0,
        "processing remote-only documents" => 3.0,
        "persisting checkpoint" => 4.0,
        "terminating" => 5.0,
        _ => -1.0,
    };
    gauge!("replication_cycle_phase").set(value);
}
