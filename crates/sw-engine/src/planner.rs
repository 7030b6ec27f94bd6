//! Batch planner.
//!
//! Turns (template, recipient filter, pacing) into a durable batch plus one
//! message per recipient, rendered up front and persisted atomically.

use std::sync::Arc;
use sw_common::{Batch, EngineError, Message, PacingConfig, Result};
use sw_store::{CampaignStore, CustomerStore, RecipientFilter, TemplateStore};
use tracing::{debug, info, warn};

use crate::estimate::{estimate, Estimate};
use crate::render;

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub batch_id: String,
    pub estimate: Estimate,
    /// Recipients that resolved for this batch.
    pub total_count: u32,
    /// Recipients written off at planning time (render failures).
    pub skipped_count: u32,
}

pub struct BatchPlanner {
    customers: Arc<dyn CustomerStore>,
    templates: Arc<dyn TemplateStore>,
    store: Arc<dyn CampaignStore>,
    /// Per-send latency assumption fed to the estimator.
    per_send_seconds: f64,
}

impl BatchPlanner {
    pub fn new(
        customers: Arc<dyn CustomerStore>,
        templates: Arc<dyn TemplateStore>,
        store: Arc<dyn CampaignStore>,
        per_send_seconds: f64,
    ) -> Self {
        Self {
            customers,
            templates,
            store,
            per_send_seconds,
        }
    }

    /// Create a batch: resolve recipients, render each message, persist the
    /// batch and all messages atomically, return the id plus an estimate
    /// computed against the actual resolved count.
    ///
    /// A render failure (missing attribute) marks that one message `skipped`
    /// rather than aborting the batch.
    pub async fn create_batch(
        &self,
        template_id: &str,
        filter: &RecipientFilter,
        pacing: PacingConfig,
        requested_by: &str,
    ) -> Result<PlanOutcome> {
        pacing.validate()?;

        let template = self
            .templates
            .get_template(template_id)
            .await?
            .ok_or_else(|| EngineError::TemplateNotFound(template_id.to_string()))?;

        let recipients = self.customers.list_customers(filter).await?;
        if recipients.is_empty() {
            return Err(EngineError::EmptyRecipientSet);
        }

        let total_count = recipients.len() as u32;

        // Pure arithmetic, validated up front: an estimator rejection must
        // leave nothing persisted.
        let estimate = estimate(
            total_count,
            pacing.batch_size,
            pacing.delay_seconds,
            self.per_send_seconds,
        )?;

        let batch = Batch::new(template_id, requested_by, pacing, total_count);

        let mut messages = Vec::with_capacity(recipients.len());
        let mut skipped_count = 0u32;
        for (seq, customer) in recipients.iter().enumerate() {
            let seq = seq as u32;
            match render::render(&template.body, customer) {
                Ok(body) => {
                    messages.push(Message::pending(
                        &batch.id,
                        &customer.id,
                        &customer.phone,
                        body,
                        seq,
                    ));
                }
                Err(err) => {
                    warn!(
                        batch_id = %batch.id,
                        customer_id = %customer.id,
                        %err,
                        "Skipping recipient: template render failed"
                    );
                    messages.push(Message::skipped(
                        &batch.id,
                        &customer.id,
                        &customer.phone,
                        seq,
                        err.to_string(),
                    ));
                    skipped_count += 1;
                }
            }
        }
        debug_assert_eq!(messages.len() as u32, batch.total_count);

        self.store.insert_batch(&batch, &messages).await?;

        info!(
            batch_id = %batch.id,
            template_id,
            recipients = total_count,
            skipped = skipped_count,
            groups = estimate.batches,
            "Created batch"
        );
        debug!(batch_id = %batch.id, estimated_seconds = estimate.estimated_seconds, "Batch estimate");

        Ok(PlanOutcome {
            batch_id: batch.id,
            estimate,
            total_count,
            skipped_count,
        })
    }
}
