//! Crash recovery sweep.
//!
//! A message persisted as `sending` with no owning worker is a crash
//! artifact, not a valid resting state. The sweep runs before the scheduler
//! claims anything after startup: it resets orphaned `sending` messages to
//! `pending` and demotes ownerless `running` batches to `scheduled`.
//! Resolved automatically and logged; never surfaced as a user-facing
//! failure.

use sw_store::CampaignStore;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub messages_reset: u64,
    pub batches_rearmed: u64,
}

pub async fn recover(store: &dyn CampaignStore) -> anyhow::Result<RecoveryReport> {
    debug!("Running crash recovery sweep");

    let messages_reset = store.reset_sending(None).await?;
    let batches_rearmed = store.reset_running_batches().await?;

    if messages_reset > 0 || batches_rearmed > 0 {
        info!(
            messages_reset,
            batches_rearmed, "Recovered orphaned in-flight work"
        );
    }

    Ok(RecoveryReport {
        messages_reset,
        batches_rearmed,
    })
}
