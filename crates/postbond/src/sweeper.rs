//! Expiry sweep: time out overdue AUTHORIZED messages.
//!
//! A silent receiver must not keep a sender's bond hostage, so the sweep
//! resolves every overdue message the way an explicit Release would:
//! capture the fee, return the bond, mark RELEASED. The sweep enjoys no
//! special authority; it goes through the same engine path as everyone
//! else and simply loses when another trigger got there first. One bad
//! item never stops the batch.

use chrono::Utc;
use serde::Serialize;

use crate::engine::Engine;
use crate::error::PostbondError;
use crate::gateway::AuthorizationGateway;

/// Default per-run batch size. Keeps a single run bounded; the backlog
/// drains across runs.
pub const SWEEP_BATCH_LIMIT: usize = 50;

/// Tally of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    /// Overdue messages picked up this run.
    pub checked: usize,
    /// Resolved RELEASED by this run.
    pub resolved: usize,
    /// Lost to another trigger or hit a transient error; retried next run
    /// if still unresolved.
    pub skipped: usize,
}

/// Run one sweep over at most `limit` overdue messages, oldest deadline
/// first.
pub async fn run_sweep<G: AuthorizationGateway>(
    engine: &Engine<G>,
    limit: usize,
) -> Result<SweepOutcome, PostbondError> {
    let due = engine.store().due_for_sweep(Utc::now(), limit)?;
    let mut outcome = SweepOutcome {
        checked: due.len(),
        ..Default::default()
    };

    for message in due {
        match engine.release(&message.public_id).await {
            // A release without our own capture reference means the engine
            // only reconciled a hold someone else had already resolved.
            Ok(released) if released.capture_ref.is_some() => outcome.resolved += 1,
            Ok(_) => {
                tracing::info!(
                    public_id = %message.public_id,
                    "sweep found the hold already released out-of-band"
                );
                outcome.skipped += 1;
            }
            Err(PostbondError::StateConflict { current }) => {
                tracing::info!(
                    public_id = %message.public_id,
                    current = %current,
                    "sweep lost to another trigger"
                );
                outcome.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(
                    public_id = %message.public_id,
                    error = %e,
                    "sweep item failed, leaving for the next run"
                );
                outcome.skipped += 1;
            }
        }
    }

    tracing::info!(
        checked = outcome.checked,
        resolved = outcome.resolved,
        skipped = outcome.skipped,
        "sweep complete"
    );
    Ok(outcome)
}
