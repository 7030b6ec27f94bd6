//! Batch progress monitoring.
//!
//! Read-only views over the campaign store. Progress is always derived from
//! message rows at query time; there is no stored counter to drift.

use std::sync::Arc;

use serde::Serialize;
use sw_common::{BatchStatus, EngineError, Message, PacingConfig, Result};
use sw_store::{CampaignStore, CustomerStore, Progress, TemplateStore};

use chrono::{DateTime, Utc};

/// One batch with its derived progress, as shown to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub id: String,
    pub template_id: String,
    pub requested_by: String,
    pub status: BatchStatus,
    pub pacing: PacingConfig,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cross-batch aggregate for the landing view.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DashboardStats {
    pub total_customers: u64,
    pub templates_count: u64,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub active_batches: u64,
}

pub struct BatchMonitor {
    store: Arc<dyn CampaignStore>,
    customers: Arc<dyn CustomerStore>,
    templates: Arc<dyn TemplateStore>,
}

impl BatchMonitor {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        customers: Arc<dyn CustomerStore>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        Self {
            store,
            customers,
            templates,
        }
    }

    pub async fn batch_summary(&self, batch_id: &str) -> Result<BatchSummary> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))?;
        let progress = self.store.progress(batch_id).await?;

        Ok(BatchSummary {
            id: batch.id,
            template_id: batch.template_id,
            requested_by: batch.requested_by,
            status: batch.status,
            pacing: batch.pacing,
            progress,
            created_at: batch.created_at,
            updated_at: batch.updated_at,
        })
    }

    /// Every batch with its progress, newest first.
    pub async fn list_batches(&self) -> Result<Vec<BatchSummary>> {
        let batches = self.store.list_batches().await?;
        let mut summaries = Vec::with_capacity(batches.len());
        for batch in batches {
            let progress = self.store.progress(&batch.id).await?;
            summaries.push(BatchSummary {
                id: batch.id,
                template_id: batch.template_id,
                requested_by: batch.requested_by,
                status: batch.status,
                pacing: batch.pacing,
                progress,
                created_at: batch.created_at,
                updated_at: batch.updated_at,
            });
        }
        Ok(summaries)
    }

    /// Per-message detail for one batch, in recipient order.
    pub async fn messages(&self, batch_id: &str) -> Result<Vec<Message>> {
        if self.store.get_batch(batch_id).await?.is_none() {
            return Err(EngineError::BatchNotFound(batch_id.to_string()));
        }
        Ok(self.store.messages(batch_id).await?)
    }

    pub async fn dashboard(&self) -> Result<DashboardStats> {
        let counts = self.store.dashboard_counts().await?;
        let total_customers = self.customers.customer_count().await?;
        let templates_count = self.templates.template_count().await?;
        Ok(DashboardStats {
            total_customers,
            templates_count,
            messages_sent: counts.messages_sent,
            messages_failed: counts.messages_failed,
            active_batches: counts.active_batches,
        })
    }
}
