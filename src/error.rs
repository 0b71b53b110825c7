//! Error types for cloudql.

use thiserror::Error;

/// Broad class of a failure, used by renderers and the plan statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown provider/service/resource/method, ambiguous service.
    Resolution,
    /// Missing parameters, unknown or ambiguous columns, bad filters.
    Validation,
    /// HTTP failures and non-2xx responses.
    Transport,
    /// Async operation monitoring aborted.
    Monitor,
    /// Everything else.
    Internal,
}

/// The main error type for cloudql operations.
#[derive(Debug, Error)]
pub enum CloudqlError {
    /// Failed to parse the statement text.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// A table or method reference could not be bound to provider metadata.
    #[error("{0}")]
    Resolution(String),

    /// A statement failed validation against the resolved method and schema.
    #[error("{0}")]
    Validation(String),

    /// The statement kind or construct is not supported.
    #[error("{0}")]
    Unsupported(String),

    /// The provider answered with an error status; the decoded body is kept.
    #[error("HTTP response error: {body}")]
    HttpStatus {
        status: u16,
        body: serde_json::Value,
    },

    /// The request could not be sent or the response could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Polling a long-running operation was aborted.
    #[error("cannot execute monitor: {0}")]
    Monitor(String),

    /// Credentials could not be obtained or used.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery documents could not be loaded or parsed.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Plan cannot run as built, e.g. no monitor for the provider version.
    #[error("{0}")]
    Plan(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudqlError {
    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Create a resolution error.
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an unsupported-construct error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a monitor error.
    pub fn monitor(message: impl Into<String>) -> Self {
        Self::Monitor(message.into())
    }

    /// Which class of failure this is.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Resolution(_) => ErrorCategory::Resolution,
            Self::Validation(_) | Self::Parse { .. } | Self::Unsupported(_) => {
                ErrorCategory::Validation
            }
            Self::HttpStatus { .. } | Self::Transport(_) => ErrorCategory::Transport,
            Self::Monitor(_) => ErrorCategory::Monitor,
            _ => ErrorCategory::Internal,
        }
    }
}

/// Result type alias for cloudql operations.
pub type CloudqlResult<T> = Result<T, CloudqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CloudqlError::parse(5, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Parse error at position 5: unexpected character"
        );
    }

    #[test]
    fn test_http_status_keeps_body() {
        let err = CloudqlError::HttpStatus {
            status: 404,
            body: serde_json::json!({"error": {"code": 404}}),
        };
        assert_eq!(
            err.to_string(),
            r#"HTTP response error: {"error":{"code":404}}"#
        );
        assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_monitor_prefix() {
        let err = CloudqlError::monitor("no body present");
        assert_eq!(err.to_string(), "cannot execute monitor: no body present");
        assert_eq!(err.category(), ErrorCategory::Monitor);
    }
}
