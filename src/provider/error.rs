//! Error types for the provider client.

use thiserror::Error;

/// Errors raised by [`super::BlockStorageApi`] implementations.
///
/// Only [`ProviderError::Unavailable`] is produced after retries; every other
/// variant is surfaced on the first response that carries it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Network failures, timeouts, 5xx and 429 responses that outlived the
    /// retry budget.
    #[error("provider unavailable after {attempts} attempt(s): {message}")]
    Unavailable {
        /// Number of requests sent.
        attempts: u32,
        /// Last failure observed.
        message: String,
    },
    /// The API token was rejected (401/403).
    #[error("provider rejected credentials: {message}")]
    Authentication {
        /// Message returned by the provider.
        message: String,
    },
    /// The addressed resource does not exist (404).
    #[error("{resource} not found")]
    NotFound {
        /// Resource path or identifier that was looked up.
        resource: String,
    },
    /// The provider refused the request because of the resource's current
    /// state (409/422), for example an attachment limit or an existing
    /// attachment.
    #[error("provider reported a conflict: {message}")]
    Conflict {
        /// Message returned by the provider.
        message: String,
    },
    /// Any other client error.
    #[error("provider rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message returned by the provider.
        message: String,
    },
    /// The response body could not be understood.
    #[error("failed to decode provider response: {message}")]
    Decode {
        /// Parser error message.
        message: String,
    },
    /// A caller-supplied value cannot be expressed on the wire.
    #[error("invalid provider request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Whether the error names a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
