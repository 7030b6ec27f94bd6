//! Send gateway seam.
//!
//! The transport to the messaging provider lives behind this trait. The
//! outcome split mirrors the provider's contract: transient errors (timeout,
//! throttling) are retryable, permanent ones (undeliverable number) are not.

use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    /// Retryable: timeout, connection loss, provider throttling.
    TransientError(String),
    /// Not retryable: invalid number, provider says undeliverable.
    PermanentError(String),
}

/// Must be safe to call at most once per claimed message attempt; the
/// scheduler guarantees it is never invoked twice concurrently for the same
/// message.
#[async_trait]
pub trait SendGateway: Send + Sync {
    async fn send(&self, phone: &str, body: &str) -> SendOutcome;
}

/// Dev-mode gateway: logs the send and reports success. Stands in until a
/// provider-backed transport is wired behind the same trait.
#[derive(Debug, Default)]
pub struct LoggingGateway;

#[async_trait]
impl SendGateway for LoggingGateway {
    async fn send(&self, phone: &str, body: &str) -> SendOutcome {
        info!(phone, bytes = body.len(), "Dispatched message (logging gateway)");
        SendOutcome::Ok
    }
}
