//! REST error types.

use thiserror::Error;

use crate::infrastructure::okx::auth::AuthError;

/// Errors from the REST client.
#[derive(Debug, Error, Clone)]
pub enum RestError {
    /// Transport failure (connect, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The exchange answered with a non-zero code.
    #[error("API error: {code} - {message}")]
    Exchange {
        /// Exchange error code.
        code: String,
        /// Exchange message.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("JSON parsing error: {0}")]
    Decode(String),

    /// The request could not be encoded.
    #[error("request encoding error: {0}")]
    Encode(String),

    /// Signing failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl RestError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Exchange { .. } | Self::Decode(_) | Self::Encode(_) | Self::Auth(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RestError::Http("reset".into()).is_retryable());
        assert!(
            RestError::HttpStatus {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !RestError::HttpStatus {
                status: 401,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !RestError::Exchange {
                code: "51001".into(),
                message: "Instrument ID does not exist".into()
            }
            .is_retryable()
        );
    }
}
