use thiserror::Error;

use crate::store::StoreError;

/// Result type for throttling operations
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Errors that can occur while building or using a throttle
///
/// Running out of tokens is never an error: it is reported as
/// [`Verdict::Limited`](crate::Verdict::Limited).
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// No rate was supplied to the manager or to an override entry
    #[error("Missing rate")]
    MissingRate,

    /// A rate or burst was supplied but is not a usable number
    #[error("Invalid {field}: {value:?} is not a non-negative number")]
    InvalidRate { field: &'static str, value: String },

    /// A token bucket parameter is not a usable number
    #[error("Invalid token bucket {field}: {value:?}")]
    InvalidConfig { field: &'static str, value: String },

    /// The configured storage backend does not exist
    #[error("Invalid storage backend: {0}")]
    InvalidStorage(String),

    /// The storage capability failed while reading or writing a bucket
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl ThrottleError {
    pub(crate) fn invalid_rate(field: &'static str, value: impl ToString) -> Self {
        ThrottleError::InvalidRate { field, value: value.to_string() }
    }

    pub(crate) fn invalid_config(field: &'static str, value: impl ToString) -> Self {
        ThrottleError::InvalidConfig { field, value: value.to_string() }
    }
}
