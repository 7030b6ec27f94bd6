//! In-memory stores for tests and dev mode.
//!
//! A single mutex around the campaign state doubles as the claim lock, so
//! claim exclusivity holds trivially. Not durable; the SQLite store is the
//! production path.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use sw_common::{
    Batch, BatchStatus, Customer, FailureKind, Message, MessageStatus, Template,
};

use crate::{
    CampaignStore, CustomerStore, DashboardCounts, Progress, RecipientFilter, ResumableCounts,
    TemplateStore,
};

// ============================================================================
// Customer / template stores
// ============================================================================

/// Customer list held in memory, deduplicated by phone at load time.
pub struct MemoryCustomerStore {
    customers: Vec<Customer>,
}

impl MemoryCustomerStore {
    /// Keeps the first customer seen for each phone number, preserving
    /// import order.
    pub fn new(customers: Vec<Customer>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let customers = customers
            .into_iter()
            .filter(|c| seen.insert(c.phone.clone()))
            .collect();
        Self { customers }
    }
}

#[async_trait]
impl CustomerStore for MemoryCustomerStore {
    async fn list_customers(&self, filter: &RecipientFilter) -> anyhow::Result<Vec<Customer>> {
        Ok(self
            .customers
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn customer_count(&self) -> anyhow::Result<u64> {
        Ok(self.customers.len() as u64)
    }
}

pub struct MemoryTemplateStore {
    templates: HashMap<String, Template>,
}

impl MemoryTemplateStore {
    pub fn new(templates: Vec<Template>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn get_template(&self, id: &str) -> anyhow::Result<Option<Template>> {
        Ok(self.templates.get(id).cloned())
    }

    async fn template_count(&self) -> anyhow::Result<u64> {
        Ok(self.templates.len() as u64)
    }
}

// ============================================================================
// Campaign store
// ============================================================================

#[derive(Default)]
struct Inner {
    batches: HashMap<String, Batch>,
    /// Creation order of batch ids, newest last.
    batch_order: Vec<String>,
    messages: HashMap<String, Message>,
    /// Message ids per batch in recipient (seq) order.
    message_order: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct MemoryCampaignStore {
    inner: Mutex<Inner>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: force a message into an arbitrary state, e.g. to fabricate
    /// a crash artifact left in `sending`.
    pub fn put_message_state(&self, message_id: &str, status: MessageStatus, attempts: u32) {
        let mut inner = self.inner.lock();
        if let Some(msg) = inner.messages.get_mut(message_id) {
            msg.status = status;
            msg.attempt_count = attempts;
        }
    }
}

fn progress_of(inner: &Inner, batch_id: &str) -> Progress {
    let mut progress = Progress::default();
    if let Some(ids) = inner.message_order.get(batch_id) {
        for id in ids {
            let msg = &inner.messages[id];
            progress.total += 1;
            match msg.status {
                MessageStatus::Sent => progress.sent += 1,
                MessageStatus::Failed => progress.failed += 1,
                MessageStatus::Skipped => progress.skipped += 1,
                MessageStatus::Pending | MessageStatus::Sending => progress.pending += 1,
            }
        }
    }
    progress
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn insert_batch(&self, batch: &Batch, messages: &[Message]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if inner.batches.contains_key(&batch.id) {
            anyhow::bail!("batch {} already exists", batch.id);
        }
        let mut seen = std::collections::HashSet::new();
        for msg in messages {
            if !seen.insert(msg.customer_id.clone()) {
                anyhow::bail!(
                    "duplicate message for customer {} in batch {}",
                    msg.customer_id,
                    batch.id
                );
            }
        }
        inner.batches.insert(batch.id.clone(), batch.clone());
        inner.batch_order.push(batch.id.clone());
        let mut order = Vec::with_capacity(messages.len());
        for msg in messages {
            order.push(msg.id.clone());
            inner.messages.insert(msg.id.clone(), msg.clone());
        }
        inner.message_order.insert(batch.id.clone(), order);
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> anyhow::Result<Option<Batch>> {
        Ok(self.inner.lock().batches.get(batch_id).cloned())
    }

    async fn list_batches(&self) -> anyhow::Result<Vec<Batch>> {
        let inner = self.inner.lock();
        Ok(inner
            .batch_order
            .iter()
            .rev()
            .map(|id| inner.batches[id].clone())
            .collect())
    }

    async fn claimable_batches(&self) -> anyhow::Result<Vec<Batch>> {
        let inner = self.inner.lock();
        Ok(inner
            .batch_order
            .iter()
            .map(|id| &inner.batches[id])
            .filter(|b| b.status.is_claimable())
            .cloned()
            .collect())
    }

    async fn set_batch_status(&self, batch_id: &str, status: BatchStatus) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let batch = inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| anyhow::anyhow!("batch {} not found", batch_id))?;
        batch.status = status;
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_pending(&self, batch_id: &str, limit: u32) -> anyhow::Result<Vec<Message>> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner
            .message_order
            .get(batch_id)
            .map(|order| {
                order
                    .iter()
                    .filter(|id| inner.messages[*id].status == MessageStatus::Pending)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(msg) = inner.messages.get_mut(&id) {
                msg.status = MessageStatus::Sending;
                msg.attempt_count += 1;
                claimed.push(msg.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, message_id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock();
        match inner.messages.get_mut(message_id) {
            Some(msg) if msg.status == MessageStatus::Sending => {
                msg.status = MessageStatus::Sent;
                msg.sent_at = Some(Utc::now());
                msg.error_kind = None;
                msg.last_error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        message_id: &str,
        kind: FailureKind,
        error: &str,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock();
        match inner.messages.get_mut(message_id) {
            Some(msg) if msg.status == MessageStatus::Sending => {
                msg.status = MessageStatus::Failed;
                msg.error_kind = Some(kind);
                msg.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn return_for_retry(&self, message_id: &str, error: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock();
        match inner.messages.get_mut(message_id) {
            Some(msg) if msg.status == MessageStatus::Sending => {
                msg.status = MessageStatus::Pending;
                msg.error_kind = Some(FailureKind::Transient);
                msg.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn messages(&self, batch_id: &str) -> anyhow::Result<Vec<Message>> {
        let inner = self.inner.lock();
        Ok(inner
            .message_order
            .get(batch_id)
            .map(|order| order.iter().map(|id| inner.messages[id].clone()).collect())
            .unwrap_or_default())
    }

    async fn progress(&self, batch_id: &str) -> anyhow::Result<Progress> {
        Ok(progress_of(&self.inner.lock(), batch_id))
    }

    async fn resumable_counts(&self, batch_id: &str) -> anyhow::Result<ResumableCounts> {
        let inner = self.inner.lock();
        let mut counts = ResumableCounts::default();
        if let Some(ids) = inner.message_order.get(batch_id) {
            for id in ids {
                let msg = &inner.messages[id];
                match msg.status {
                    MessageStatus::Sending => counts.sending += 1,
                    MessageStatus::Pending => counts.pending += 1,
                    MessageStatus::Failed if msg.error_kind == Some(FailureKind::Transient) => {
                        counts.transient_failed += 1
                    }
                    _ => {}
                }
            }
        }
        Ok(counts)
    }

    async fn reset_sending(&self, batch_id: Option<&str>) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock();
        let mut reset = 0;
        for msg in inner.messages.values_mut() {
            if msg.status == MessageStatus::Sending
                && batch_id.map_or(true, |id| msg.batch_id == id)
            {
                msg.status = MessageStatus::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn reset_running_batches(&self) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock();
        let mut reset = 0;
        for batch in inner.batches.values_mut() {
            if batch.status == BatchStatus::Running {
                batch.status = BatchStatus::Scheduled;
                batch.updated_at = Utc::now();
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn reset_transient_failures(&self, batch_id: &str) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock();
        let mut reset = 0;
        for msg in inner.messages.values_mut() {
            if msg.batch_id == batch_id
                && msg.status == MessageStatus::Failed
                && msg.error_kind == Some(FailureKind::Transient)
            {
                msg.status = MessageStatus::Pending;
                msg.attempt_count = 0;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn dashboard_counts(&self) -> anyhow::Result<DashboardCounts> {
        let inner = self.inner.lock();
        let mut counts = DashboardCounts::default();
        for msg in inner.messages.values() {
            match msg.status {
                MessageStatus::Sent => counts.messages_sent += 1,
                MessageStatus::Failed => counts.messages_failed += 1,
                _ => {}
            }
        }
        counts.active_batches = inner
            .batches
            .values()
            .filter(|b| b.status.is_claimable())
            .count() as u64;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_common::PacingConfig;

    fn seed_batch(count: u32) -> (MemoryCampaignStore, Batch, Vec<Message>) {
        let store = MemoryCampaignStore::new();
        let batch = Batch::new(
            "tpl-1",
            "operator-1",
            PacingConfig { batch_size: 2, delay_seconds: 0.0 },
            count,
        );
        let messages: Vec<Message> = (0..count)
            .map(|i| {
                Message::pending(
                    &batch.id,
                    format!("cust-{i}"),
                    format!("+1555000{i:04}"),
                    format!("hello {i}"),
                    i,
                )
            })
            .collect();
        (store, batch, messages)
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_ordered() {
        let (store, batch, messages) = seed_batch(5);
        store.insert_batch(&batch, &messages).await.unwrap();

        let first = store.claim_pending(&batch.id, 2).await.unwrap();
        let second = store.claim_pending(&batch.id, 10).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 3);
        assert_eq!(first[0].seq, 0);
        assert_eq!(first[1].seq, 1);
        assert_eq!(second[0].seq, 2);

        let first_ids: Vec<_> = first.iter().map(|m| &m.id).collect();
        assert!(second.iter().all(|m| !first_ids.contains(&&m.id)));
        assert!(first.iter().all(|m| m.attempt_count == 1));

        // Nothing left to claim.
        assert!(store.claim_pending(&batch.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transitions_are_guarded_by_current_status() {
        let (store, batch, messages) = seed_batch(1);
        store.insert_batch(&batch, &messages).await.unwrap();
        let id = &messages[0].id;

        // Not claimed yet: no transition applies.
        assert!(!store.mark_sent(id).await.unwrap());

        let claimed = store.claim_pending(&batch.id, 1).await.unwrap();
        assert!(store.mark_sent(&claimed[0].id).await.unwrap());
        // Terminal: a second attempt to resolve it is a lost claim.
        assert!(!store.mark_failed(&claimed[0].id, FailureKind::Transient, "x").await.unwrap());
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_customer() {
        let (store, batch, mut messages) = seed_batch(2);
        messages[1].customer_id = messages[0].customer_id.clone();
        assert!(store.insert_batch(&batch, &messages).await.is_err());
        // Atomic: nothing visible after the rejection.
        assert!(store.get_batch(&batch.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_conserves_total() {
        let (store, batch, messages) = seed_batch(4);
        store.insert_batch(&batch, &messages).await.unwrap();

        let claimed = store.claim_pending(&batch.id, 2).await.unwrap();
        store.mark_sent(&claimed[0].id).await.unwrap();
        store
            .mark_failed(&claimed[1].id, FailureKind::Permanent, "bad number")
            .await
            .unwrap();

        let p = store.progress(&batch.id).await.unwrap();
        assert_eq!(p.sent + p.failed + p.skipped + p.pending, p.total);
        assert_eq!(p.total, 4);
        assert_eq!(p.sent, 1);
        assert_eq!(p.failed, 1);
        assert_eq!(p.pending, 2);
    }

    #[tokio::test]
    async fn customer_store_dedupes_by_phone() {
        let customers = vec![
            Customer { id: "a".into(), phone: "+15550001".into(), attributes: Default::default() },
            Customer { id: "b".into(), phone: "+15550001".into(), attributes: Default::default() },
            Customer { id: "c".into(), phone: "+15550002".into(), attributes: Default::default() },
        ];
        let store = MemoryCustomerStore::new(customers);
        let all = store.list_customers(&RecipientFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[1].id, "c");
    }
}
