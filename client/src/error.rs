//! Client error types.

/// Errors returned by [`crate::TallyClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error envelope.
    #[error("API error {code}: {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// The service's stable numeric error code.
        code: u32,
        /// Human-readable message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the service reported an insufficient balance.
    #[must_use]
    pub const fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::Api { code: 190_102, .. })
    }

    /// Whether the caller may retry the exact same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            // Lock contention and wrapped infra failures.
            Self::Api { code, .. } => matches!(*code, 190_402 | 190_701..=190_703),
            Self::Decode(_) => false,
        }
    }
}
