//! Generation error types and their retry classification.

use thiserror::Error;

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Quota, rate, or server-side trouble; retry after a pause.
    Transient,
    /// Anything else; give up on this call.
    Permanent,
}

/// Errors that can occur during a generation or embedding call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider signalled quota exhaustion (HTTP 429).
    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    /// Provider failed server-side (HTTP 5xx).
    #[error("LLM server error {status}: {body}")]
    ServerError {
        /// HTTP status.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Request timed out.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// Provider could not be reached.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the request (HTTP 4xx other than 429).
    #[error("LLM request rejected {status}: {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// HTTP request failed for another reason.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// Provider response did not have the expected shape.
    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Retry classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) | Self::ServerError { .. } | Self::Timeout(_) | Self::Unavailable(_) => {
                ErrorKind::Transient
            }
            Self::Rejected { .. } | Self::RequestFailed(_) | Self::ParseError(_) | Self::ConfigError(_) => {
                ErrorKind::Permanent
            }
        }
    }

    /// Shorthand for `kind() == Transient`.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Map a non-success HTTP status to an error.
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > 512 {
            let mut cut = 512;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        match status {
            429 => Self::RateLimited(body),
            500..=599 => Self::ServerError { status, body },
            400..=499 => Self::Rejected { status, body },
            _ => Self::RequestFailed(format!("HTTP {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else if let Some(status) = err.status() {
            LlmError::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            LlmError::ParseError(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(LlmError::from_status(429, "quota").is_transient());
        assert!(LlmError::from_status(503, "busy").is_transient());
        assert_eq!(LlmError::from_status(400, "bad").kind(), ErrorKind::Permanent);
        assert_eq!(LlmError::from_status(302, "moved").kind(), ErrorKind::Permanent);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let err = LlmError::from_status(500, "é".repeat(400));
        let LlmError::ServerError { body, .. } = err else { panic!("server error") };
        assert!(body.len() <= 512);
    }

    #[test]
    fn timeout_and_unavailable_are_transient() {
        assert!(LlmError::Timeout(10).is_transient());
        assert!(LlmError::Unavailable("down".into()).is_transient());
        assert!(!LlmError::ParseError("x".into()).is_transient());
    }
}
