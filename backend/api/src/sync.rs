//! Background task that finishes ledger submissions whose confirmation was
//! not observed by the request that created them.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db;
use crate::errors::Result;
use crate::workflow::{ApprovalService, ResumeOutcome};

/// NgoProjects handled per pass.
const BATCH_SIZE: i64 = 20;

pub struct SyncState {
    pub pool: SqlitePool,
    pub service: ApprovalService,
    pub interval: Duration,
    /// Minimum quiet time before an NgoProject is picked up, so a submission
    /// still being confirmed by its own request is left alone.
    pub settle: Duration,
}

/// Run the sync loop until `shutdown` fires.
pub async fn run(state: SyncState, shutdown: CancellationToken) {
    info!(
        "Ledger sync starting (every {}s, settle {}s)",
        state.interval.as_secs(),
        state.settle.as_secs()
    );

    loop {
        match sync_once(&state).await {
            Ok(0) => {}
            Ok(mapped) => info!("Ledger sync mapped {mapped} submissions"),
            Err(e) => error!("Ledger sync error: {e}"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(state.interval) => {}
        }
    }
    info!("Ledger sync stopped");
}

/// One pass over unmapped NgoProjects. Returns how many got their id.
async fn sync_once(state: &SyncState) -> Result<usize> {
    let settled_before = Utc::now().timestamp() - state.settle.as_secs() as i64;
    let pending = db::unsynced_ngo_projects(&state.pool, settled_before, BATCH_SIZE).await?;

    let mut mapped = 0;
    for ngo_project in &pending {
        match state.service.resume_submission(ngo_project).await {
            Ok(ResumeOutcome::Mapped(_)) => mapped += 1,
            Ok(ResumeOutcome::AwaitingConfirmation) => {}
            Ok(ResumeOutcome::Resubmitted) => {
                info!("NGO project {} resubmitted to the ledger", ngo_project.id)
            }
            Ok(ResumeOutcome::NeedsReview) => {
                warn!("NGO project {} parked for manual review", ngo_project.id)
            }
            Err(e) => warn!("Could not sync NGO project {}: {e}", ngo_project.id),
        }
    }
    Ok(mapped)
}
