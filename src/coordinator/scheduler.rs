// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scheduler: runs cycles back to back with a pause in between.
//!
//! The first cycle starts immediately. The interval is measured from the end
//! of one cycle to the start of the next, so a slow cycle never overlaps the
//! next one.
//!
//! The scheduler stops when:
//! - shutdown is signalled (a running cycle is allowed to finish)
//! - a cycle fails fatally (engine moves to `Terminating`)
//! - the continuation flag was cleared by a failed manual cycle

use super::cycle::CycleRunner;
use super::types::EngineState;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Run the scheduler loop until it is told to stop.
pub async fn run_scheduler(
    runner: Arc<CycleRunner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: Arc<watch::Sender<EngineState>>,
) {
    let span = tracing::info_span!("scheduler", replica = %runner.replica_id());

    async move {
        // Mark initial shutdown value as seen so changed() only fires on actual changes
        let _ = shutdown_rx.borrow_and_update();

        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting replication scheduler"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if !runner.should_continue() {
                info!("Continuation flag cleared, stopping scheduler");
                mark_terminating(&state_tx);
                break;
            }

            if let Err(e) = runner.run().await {
                warn!(error = %e, "Scheduling halted after failed cycle");
                mark_terminating(&state_tx);
                break;
            }

            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping scheduler");
                        break;
                    }
                }

                _ = tokio::time::sleep(interval) => {
                    debug!("Scheduler interval elapsed");
                }
            }
        }

        info!("Replication scheduler stopped");
    }
    .instrument(span)
    .await
}

/// Move a running engine to `Terminating`. Any other state is left alone.
pub(crate) fn mark_terminating(state_tx: &watch::Sender<EngineState>) {
    let changed = state_tx.send_if_modified(|state| {
        if *state == EngineState::Running {
            *state = EngineState::Terminating;
            true
        } else {
            false
        }
    });
    if changed {
        metrics::set_engine_state("Terminating");
    }
}
