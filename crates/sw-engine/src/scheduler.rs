//! Dispatch scheduler.
//!
//! Drains batches against the send gateway. Each active batch is owned by
//! exactly one worker; within a batch, messages are claimed exclusively in
//! recipient order in groups of `batch_size`, sent concurrently, and the
//! inter-group delay is honored regardless of how fast the sends complete.
//! Group membership is settled (terminal or retry-pending) before the delay
//! timer starts.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use sw_common::{Batch, BatchStatus, EngineError, Message, Result};
use sw_store::CampaignStore;

use crate::gateway::{SendGateway, SendOutcome};
use crate::recovery;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Send attempts per message before a transient failure becomes terminal.
    pub max_attempts: u32,
    /// How many batches may be drained concurrently.
    pub worker_slots: usize,
    /// How often the run loop polls for claimable batches.
    pub poll_interval: Duration,
    /// Optional global ceiling across all batches, messages per minute.
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            worker_slots: 4,
            poll_interval: Duration::from_millis(1000),
            rate_limit_per_minute: None,
        }
    }
}

pub struct DispatchScheduler {
    store: Arc<dyn CampaignStore>,
    gateway: Arc<dyn SendGateway>,
    config: SchedulerConfig,
    /// Global pace ceiling shared by every worker.
    limiter: Option<Arc<DirectLimiter>>,
    /// Batch ids currently owned by a worker. Ownership here plus the
    /// store's guarded claim is what rules out double-sends.
    active: Arc<DashSet<String>>,
    /// Operator stop requests, honored at the next group boundary.
    stopping: Arc<DashSet<String>>,
    shutdown: Arc<AtomicBool>,
    recovered: AtomicBool,
}

impl DispatchScheduler {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        gateway: Arc<dyn SendGateway>,
        config: SchedulerConfig,
    ) -> Self {
        let limiter = config
            .rate_limit_per_minute
            .and_then(NonZeroU32::new)
            .map(|per_minute| Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))));

        Self {
            store,
            gateway,
            config,
            limiter,
            active: Arc::new(DashSet::new()),
            stopping: Arc::new(DashSet::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            recovered: AtomicBool::new(false),
        }
    }

    /// Request process-level shutdown: stop claiming new groups, let
    /// in-flight groups finish, park unfinished batches as stalled.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait for every batch worker to park. Call after `shutdown()`.
    pub async fn wait_for_workers(&self) {
        while !self.active.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Operator stop for one batch. A running batch parks at its next group
    /// boundary (the in-flight group finishes); a scheduled one stalls
    /// immediately. Resumable via reschedule.
    pub async fn stop_batch(&self, batch_id: &str) -> Result<()> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))?;

        if !batch.status.is_claimable() {
            return Err(EngineError::InvalidInput(format!(
                "batch {} is {}, nothing to stop",
                batch_id,
                batch.status.as_str()
            )));
        }

        if self.active.contains(batch_id) {
            self.stopping.insert(batch_id.to_string());
            info!(batch_id, "Stop requested; batch will park at the next group boundary");
        } else {
            self.store
                .set_batch_status(batch_id, BatchStatus::Stalled)
                .await?;
            info!(batch_id, "Stopped scheduled batch");
        }
        Ok(())
    }

    /// Recovery sweep, exactly once per scheduler lifetime, before the first
    /// claim. Orphaned `sending` rows from a previous process must be back
    /// in `pending` before any new group is claimed.
    async fn ensure_recovered(&self) -> Result<()> {
        if self
            .recovered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            match recovery::recover(self.store.as_ref()).await {
                Ok(report) => {
                    debug!(
                        messages_reset = report.messages_reset,
                        batches_rearmed = report.batches_rearmed,
                        "Recovery sweep done"
                    );
                }
                Err(err) => {
                    self.recovered.store(false, Ordering::SeqCst);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Run the scheduler until shutdown: poll for claimable batches and hand
    /// each to its own worker, at most `worker_slots` at a time.
    pub async fn run(self: Arc<Self>) {
        if let Err(err) = self.ensure_recovered().await {
            error!(error = %err, "Recovery sweep failed; refusing to claim work");
            return;
        }

        info!(
            worker_slots = self.config.worker_slots,
            max_attempts = self.config.max_attempts,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            rate_limit_per_minute = ?self.config.rate_limit_per_minute,
            "Starting dispatch scheduler"
        );

        let slots = Arc::new(Semaphore::new(self.config.worker_slots));

        while !self.is_shutdown() {
            match self.store.claimable_batches().await {
                Ok(batches) => {
                    for batch in batches {
                        if self.is_shutdown() {
                            break;
                        }
                        if !self.active.insert(batch.id.clone()) {
                            continue; // already owned by a worker
                        }
                        let permit = match slots.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            let _permit = permit;
                            let batch_id = batch.id.clone();
                            if let Err(err) = this.process_batch(&batch).await {
                                error!(batch_id = %batch_id, error = %err, "Batch worker failed");
                            }
                            // A stop request that arrived after the final
                            // boundary check was never consumed; drop it with
                            // the ownership so it cannot park a later run.
                            this.stopping.remove(&batch_id);
                            this.active.remove(&batch_id);
                        });
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to poll for claimable batches");
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        info!("Dispatch scheduler stopped");
    }

    /// One synchronous scheduling pass: claim every eligible batch and drain
    /// each to completion (or stall) inline. Returns how many were drained.
    pub async fn run_once(&self) -> Result<u32> {
        self.ensure_recovered().await?;

        let mut drained = 0;
        for batch in self.store.claimable_batches().await? {
            if !self.active.insert(batch.id.clone()) {
                continue;
            }
            let result = self.process_batch(&batch).await;
            self.stopping.remove(&batch.id);
            self.active.remove(&batch.id);
            result?;
            drained += 1;
        }
        Ok(drained)
    }

    /// Drain one batch: claim a group, send it, settle it, delay, repeat.
    pub async fn process_batch(&self, batch: &Batch) -> Result<()> {
        let batch_id = batch.id.as_str();
        let delay = Duration::from_secs_f64(batch.pacing.delay_seconds);
        let mut running = batch.status == BatchStatus::Running;

        loop {
            if self.is_shutdown() || self.stopping.remove(batch_id).is_some() {
                return self.park(batch_id).await;
            }

            let claimed = self
                .store
                .claim_pending(batch_id, batch.pacing.batch_size)
                .await?;

            if claimed.is_empty() {
                let progress = self.store.progress(batch_id).await?;
                if progress.pending == 0 {
                    self.store
                        .set_batch_status(batch_id, BatchStatus::Completed)
                        .await?;
                    info!(
                        batch_id,
                        sent = progress.sent,
                        failed = progress.failed,
                        skipped = progress.skipped,
                        "Batch completed"
                    );
                    return Ok(());
                }
                // Pending work we could not claim: another claimer holds it.
                // Single-owner batches never hit this; yield and retry.
                warn!(batch_id, pending = progress.pending, "Claim returned empty with pending work");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }

            if !running {
                self.store
                    .set_batch_status(batch_id, BatchStatus::Running)
                    .await?;
                running = true;
            }

            debug!(batch_id, group_size = claimed.len(), "Dispatching group");

            // Hard synchronization point: every group member reaches a
            // terminal or retry-pending state before the delay starts.
            let results =
                futures::future::join_all(claimed.into_iter().map(|msg| self.dispatch_one(msg)))
                    .await;
            for result in results {
                result?;
            }

            let progress = self.store.progress(batch_id).await?;
            if progress.pending == 0 {
                self.store
                    .set_batch_status(batch_id, BatchStatus::Completed)
                    .await?;
                info!(
                    batch_id,
                    sent = progress.sent,
                    failed = progress.failed,
                    skipped = progress.skipped,
                    "Batch completed"
                );
                return Ok(());
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Send one claimed message and record the outcome. Each transition is a
    /// guarded single-row write; a false return means the claim was lost to
    /// a concurrent writer and nothing was recorded.
    async fn dispatch_one(&self, msg: Message) -> Result<()> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        match self.gateway.send(&msg.phone, &msg.body).await {
            SendOutcome::Ok => {
                if !self.store.mark_sent(&msg.id).await? {
                    warn!(message_id = %msg.id, "Lost claim while marking sent");
                }
            }
            SendOutcome::TransientError(reason) => {
                if msg.attempt_count >= self.config.max_attempts {
                    warn!(
                        message_id = %msg.id,
                        attempts = msg.attempt_count,
                        reason = %reason,
                        "Retry budget exhausted"
                    );
                    self.store
                        .mark_failed(&msg.id, sw_common::FailureKind::Transient, &reason)
                        .await?;
                } else {
                    debug!(
                        message_id = %msg.id,
                        attempt = msg.attempt_count,
                        reason = %reason,
                        "Transient send failure, returning for retry"
                    );
                    self.store.return_for_retry(&msg.id, &reason).await?;
                }
            }
            SendOutcome::PermanentError(reason) => {
                warn!(message_id = %msg.id, reason = %reason, "Permanent send failure");
                self.store
                    .mark_failed(&msg.id, sw_common::FailureKind::Permanent, &reason)
                    .await?;
            }
        }
        Ok(())
    }

    /// Park an interrupted batch: remaining work stays `pending` (never
    /// `sending`), the batch stalls if anything is left, completes otherwise.
    async fn park(&self, batch_id: &str) -> Result<()> {
        let progress = self.store.progress(batch_id).await?;
        if progress.pending > 0 {
            self.store
                .set_batch_status(batch_id, BatchStatus::Stalled)
                .await?;
            warn!(batch_id, pending = progress.pending, "Batch parked as stalled");
        } else {
            self.store
                .set_batch_status(batch_id, BatchStatus::Completed)
                .await?;
            info!(batch_id, "Batch completed at stop boundary");
        }
        Ok(())
    }
}
