use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Failures reported by an external payment rail.
///
/// Non-response is deliberately a separate variant from a provider-reported
/// rejection: a timed-out initiation frequently completes out-of-band.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("provider did not respond within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum PaymentError {
    /// Client-correctable bad input (which field, and why).
    #[error("validation error: {0}")]
    ValidationError(String),
    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFoundError(String),
    /// An atomic precondition failed, e.g. a double redemption.
    #[error("conflict: {0}")]
    ConflictError(String),
    /// A time-boxed entity is past its validity window.
    #[error("expired: {0}")]
    ExpiredError(String),
    #[error("provider error: {0}")]
    ProviderError(#[from] ProviderError),
    /// Unexpected fault. Logged with full context, rendered generically.
    #[error("internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InternalError(Box::new(err))
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err)
    }
}

impl From<csv::Error> for PaymentError {
    fn from(err: csv::Error) -> Self {
        Self::internal(err)
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        Self::internal(err)
    }
}
