//! Engine error taxonomy.
//!
//! Validation and not-found errors reject synchronously with nothing
//! persisted. Send failures never surface here: they are recorded on the
//! affected message and visible only through the monitor's counts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad pacing config or estimator input. Nothing persisted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// The recipient filter resolved to zero customers.
    #[error("recipient filter resolved to zero customers")]
    EmptyRecipientSet,

    /// Reschedule found no failed or leftover in-flight work to re-arm.
    #[error("nothing to resume for batch {0}")]
    NothingToResume(String),

    /// Persistence failure, opaque to callers.
    #[error("store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Store(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
