use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod error;
pub mod logging;

pub use error::{EngineError, Result};

// ============================================================================
// External collaborator records
// ============================================================================

/// A recipient as handed to the core by the customer store.
///
/// Immutable once imported; the phone number is the deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub phone: String,
    /// Free-form attributes available to template rendering (name, category, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Customer {
    /// Look up a render field. `phone` is always available as a built-in.
    pub fn field(&self, key: &str) -> Option<&str> {
        if key == "phone" {
            return Some(&self.phone);
        }
        self.attributes.get(key).map(|s| s.as_str())
    }
}

/// A reusable message body with `{name}` style placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub body: String,
}

// ============================================================================
// Pacing
// ============================================================================

/// Send-rate parameters for one batch: group size and inter-group delay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PacingConfig {
    pub batch_size: u32,
    pub delay_seconds: f64,
}

impl PacingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngineError::InvalidInput(
                "batch_size must be a positive integer".into(),
            ));
        }
        if !self.delay_seconds.is_finite() || self.delay_seconds < 0.0 {
            return Err(EngineError::InvalidInput(
                "delay_seconds must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Batch
// ============================================================================

/// Batch lifecycle: `Scheduled -> Running -> {Completed, Stalled}`.
/// `Stalled -> Scheduled` only through an explicit reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Scheduled,
    Running,
    Completed,
    Stalled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stalled => "stalled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stalled" => Some(Self::Stalled),
            _ => None,
        }
    }

    /// Batches a scheduler worker may pick up.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }
}

/// One campaign run of a template against a fixed recipient set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub template_id: String,
    pub requested_by: String,
    pub pacing: PacingConfig,
    /// Recipient count captured at planning time, frozen thereafter.
    pub total_count: u32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        template_id: impl Into<String>,
        requested_by: impl Into<String>,
        pacing: PacingConfig,
        total_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            template_id: template_id.into(),
            requested_by: requested_by.into(),
            pacing,
            total_count,
            status: BatchStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Message lifecycle: `Pending -> Sending -> {Sent, Failed}`;
/// `Pending -> Skipped` only at planning time; `Failed -> Pending` only via
/// bounded retry or an explicit reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Skipped,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }
}

/// Classification of a recorded failure. Transient failures are eligible for
/// retry and reschedule; permanent ones never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(Self::Transient),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

/// One recipient's copy of a batch, tracked independently to completion.
///
/// The body is resolved at planning time so a later template edit cannot
/// alter what was (or will be) sent. Exactly one message exists per
/// (batch, customer) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub batch_id: String,
    pub customer_id: String,
    pub phone: String,
    pub body: String,
    /// Recipient order within the batch; claims follow this order.
    pub seq: u32,
    pub status: MessageStatus,
    pub attempt_count: u32,
    pub error_kind: Option<FailureKind>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn pending(
        batch_id: impl Into<String>,
        customer_id: impl Into<String>,
        phone: impl Into<String>,
        body: impl Into<String>,
        seq: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            customer_id: customer_id.into(),
            phone: phone.into(),
            body: body.into(),
            seq,
            status: MessageStatus::Pending,
            attempt_count: 0,
            error_kind: None,
            last_error: None,
            sent_at: None,
        }
    }

    /// A message written off at planning time (render failure). Terminal from
    /// birth; the batch proceeds without it.
    pub fn skipped(
        batch_id: impl Into<String>,
        customer_id: impl Into<String>,
        phone: impl Into<String>,
        seq: u32,
        reason: impl Into<String>,
    ) -> Self {
        let mut msg = Self::pending(batch_id, customer_id, phone, String::new(), seq);
        msg.status = MessageStatus::Skipped;
        msg.last_error = Some(reason.into());
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            MessageStatus::Pending,
            MessageStatus::Sending,
            MessageStatus::Sent,
            MessageStatus::Failed,
            MessageStatus::Skipped,
        ] {
            assert_eq!(MessageStatus::parse(s.as_str()), Some(s));
        }
        for s in [
            BatchStatus::Scheduled,
            BatchStatus::Running,
            BatchStatus::Completed,
            BatchStatus::Stalled,
        ] {
            assert_eq!(BatchStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(MessageStatus::Skipped.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Sending.is_terminal());
    }

    #[test]
    fn pacing_validation() {
        assert!(PacingConfig { batch_size: 0, delay_seconds: 1.0 }.validate().is_err());
        assert!(PacingConfig { batch_size: 5, delay_seconds: -1.0 }.validate().is_err());
        assert!(PacingConfig { batch_size: 5, delay_seconds: 0.0 }.validate().is_ok());
    }
}
