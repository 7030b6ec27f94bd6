//! Reschedule of stalled or failed batches.
//!
//! Re-arms exactly the work that can still make progress: orphaned `sending`
//! claims, unclaimed `pending` messages, and transient failures (attempt
//! budget reset). Permanent failures, sent, and skipped messages are never
//! touched, so a resumed run can only move forward.

use std::sync::Arc;

use sw_common::{BatchStatus, EngineError, Result};
use sw_store::CampaignStore;
use tracing::info;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RescheduleReport {
    /// Orphaned claims reset to pending.
    pub sending_reset: u64,
    /// Transient failures re-armed with a fresh attempt budget.
    pub failures_rearmed: u64,
    /// Messages that were already pending and simply ride along.
    pub pending_carried: u64,
}

impl RescheduleReport {
    pub fn total_resumable(&self) -> u64 {
        self.sending_reset + self.failures_rearmed + self.pending_carried
    }
}

pub struct RescheduleController {
    store: Arc<dyn CampaignStore>,
}

impl RescheduleController {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    /// Re-arm a batch so the scheduler picks it up again.
    ///
    /// Rejected while a worker still owns the batch (`running`); stop it
    /// first. When nothing is resumable (all terminal, or only permanent
    /// failures remain) this is `NothingToResume`, not a silent no-op.
    pub async fn reschedule(&self, batch_id: &str) -> Result<RescheduleReport> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))?;

        if batch.status == BatchStatus::Running {
            return Err(EngineError::InvalidInput(format!(
                "batch {batch_id} is running; stop it before rescheduling"
            )));
        }

        let counts = self.store.resumable_counts(batch_id).await?;
        if counts.is_empty() {
            return Err(EngineError::NothingToResume(batch_id.to_string()));
        }

        let sending_reset = self.store.reset_sending(Some(batch_id)).await?;
        let failures_rearmed = self.store.reset_transient_failures(batch_id).await?;
        self.store
            .set_batch_status(batch_id, BatchStatus::Scheduled)
            .await?;

        let report = RescheduleReport {
            sending_reset,
            failures_rearmed,
            pending_carried: counts.pending,
        };

        info!(
            batch_id,
            sending_reset = report.sending_reset,
            failures_rearmed = report.failures_rearmed,
            pending_carried = report.pending_carried,
            "Rescheduled batch"
        );

        Ok(report)
    }
}
