//! Persistence contracts for the dispatch engine.
//!
//! The message table is the one correctness-critical shared resource: every
//! status transition is a single atomic read-modify-write keyed by message
//! id, and the group claim is exclusive. Implementations return
//! `anyhow::Result`; the engine converts at its boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sw_common::{Batch, BatchStatus, Customer, FailureKind, Message, Template};

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryCampaignStore, MemoryCustomerStore, MemoryTemplateStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCampaignStore;

/// Derived per-batch progress. Always recomputed from message rows, never a
/// stored counter. In-flight (`sending`) messages count as pending: they are
/// not terminal, and `sent + failed + skipped + pending == total` must hold
/// at every observation point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
    pub pending: u64,
    pub total: u64,
}

/// Counts a reschedule decision needs: what is actually re-armable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumableCounts {
    /// Crash artifacts: claimed but never resolved.
    pub sending: u64,
    /// Unclaimed work left behind by a stall.
    pub pending: u64,
    /// Failures recorded with a transient kind.
    pub transient_failed: u64,
}

impl ResumableCounts {
    pub fn is_empty(&self) -> bool {
        self.sending == 0 && self.pending == 0 && self.transient_failed == 0
    }
}

/// Message-level aggregate across all batches, for the dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DashboardCounts {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub active_batches: u64,
}

/// Recipient selection handed to the customer store. Empty filter = everyone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipientFilter {
    /// Restrict to these customer ids.
    pub customer_ids: Option<Vec<String>>,
    /// Restrict to customers whose `category` attribute matches.
    pub category: Option<String>,
}

impl RecipientFilter {
    pub fn matches(&self, customer: &Customer) -> bool {
        if let Some(ids) = &self.customer_ids {
            if !ids.iter().any(|id| id == &customer.id) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if customer.attributes.get("category").map(|c| c.as_str()) != Some(category.as_str()) {
                return false;
            }
        }
        true
    }
}

/// External collaborator: the customer list. Returns recipients deduplicated
/// by phone number in stable import order.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn list_customers(&self, filter: &RecipientFilter) -> anyhow::Result<Vec<Customer>>;

    async fn customer_count(&self) -> anyhow::Result<u64>;
}

/// External collaborator: reusable message templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(&self, id: &str) -> anyhow::Result<Option<Template>>;

    async fn template_count(&self) -> anyhow::Result<u64>;
}

/// Durable batch + message state owned by the engine.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Persist a batch and all its messages atomically: either every row is
    /// visible or none is.
    async fn insert_batch(&self, batch: &Batch, messages: &[Message]) -> anyhow::Result<()>;

    async fn get_batch(&self, batch_id: &str) -> anyhow::Result<Option<Batch>>;

    /// All batches, newest first.
    async fn list_batches(&self) -> anyhow::Result<Vec<Batch>>;

    /// Batches a scheduler worker may pick up (`scheduled` or `running`).
    async fn claimable_batches(&self) -> anyhow::Result<Vec<Batch>>;

    async fn set_batch_status(&self, batch_id: &str, status: BatchStatus) -> anyhow::Result<()>;

    /// Exclusively claim up to `limit` pending messages for this batch in
    /// recipient order, marking them `sending` and counting the attempt.
    /// No two callers ever receive the same message.
    async fn claim_pending(&self, batch_id: &str, limit: u32) -> anyhow::Result<Vec<Message>>;

    /// `sending -> sent`. Returns false if the message was not in `sending`
    /// (the claim was lost), in which case nothing is written.
    async fn mark_sent(&self, message_id: &str) -> anyhow::Result<bool>;

    /// `sending -> failed` with the failure kind recorded.
    async fn mark_failed(
        &self,
        message_id: &str,
        kind: FailureKind,
        error: &str,
    ) -> anyhow::Result<bool>;

    /// `sending -> pending` for a transient failure with retry budget left.
    /// The attempt already counted at claim time is kept.
    async fn return_for_retry(&self, message_id: &str, error: &str) -> anyhow::Result<bool>;

    /// Ordered message list for one batch.
    async fn messages(&self, batch_id: &str) -> anyhow::Result<Vec<Message>>;

    async fn progress(&self, batch_id: &str) -> anyhow::Result<Progress>;

    async fn resumable_counts(&self, batch_id: &str) -> anyhow::Result<ResumableCounts>;

    /// Crash recovery: reset every `sending` message (optionally scoped to
    /// one batch) back to `pending`. Returns how many were reset.
    async fn reset_sending(&self, batch_id: Option<&str>) -> anyhow::Result<u64>;

    /// Crash recovery: demote `running` batches with no owning worker back
    /// to `scheduled`. Returns how many were demoted.
    async fn reset_running_batches(&self) -> anyhow::Result<u64>;

    /// Reschedule: re-arm transiently failed messages (`failed`/transient ->
    /// `pending`, attempt budget reset). Permanent failures are untouched.
    async fn reset_transient_failures(&self, batch_id: &str) -> anyhow::Result<u64>;

    async fn dashboard_counts(&self) -> anyhow::Result<DashboardCounts>;
}
