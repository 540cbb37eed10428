use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification attached to every failure the engine can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A pause or a pass over the source exceeded its deadline.
    Timeout,
    /// Connectivity-style failure that is expected to go away on its own.
    Transient,
    /// Data or validation failure. Retrying would reproduce it.
    Fatal,
    /// Caller-requested termination. Never retried, never reported as a failure.
    Cancelled,
}

impl ErrorKind {
    /// Whether the default retry policy treats this kind as retryable.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(self, Self::Timeout | Self::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure raised while pulling from an `EventSource`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind} error at position {position}: {message}")]
pub struct SourceError {
    pub kind: ErrorKind,
    pub message: String,
    /// Script position the failure was raised at.
    pub position: usize,
}

impl SourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
        }
    }

    pub fn cancelled(position: usize) -> Self {
        Self::new(ErrorKind::Cancelled, "event source closed", position)
    }
}

/// Terminal failure carried by a session that ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("session failed ({kind}) after {retries} retries: {message}")]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Retries performed before giving up.
    pub retries: u32,
}

impl SessionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retries: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            retries,
        }
    }
}

/// Validation error for a single submitted field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("field `{field}`: {reason}")]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid configuration or script document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },
}

/// Top-level error type for the public session API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Rejected before the session started.
    #[error("config error: {0}")]
    Config(String),
    /// The session terminated in `failed`.
    #[error(transparent)]
    Failed(SessionFailure),
    /// The session terminated in `cancelled`.
    #[error("session cancelled")]
    Cancelled,
    /// Internal invariant violation (driver vanished, illegal transition).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Error classification, when one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed(failure) => Some(failure.kind),
            Self::Cancelled => Some(ErrorKind::Cancelled),
            Self::Config(_) | Self::Protocol(_) => None,
        }
    }
}

impl From<SessionFailure> for SessionError {
    fn from(value: SessionFailure) -> Self {
        SessionError::Failed(value)
    }
}

impl From<ConfigError> for SessionError {
    fn from(value: ConfigError) -> Self {
        SessionError::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retryable_kinds_are_timeout_and_transient() {
        assert!(ErrorKind::Timeout.is_retryable_by_default());
        assert!(ErrorKind::Transient.is_retryable_by_default());
        assert!(!ErrorKind::Fatal.is_retryable_by_default());
        assert!(!ErrorKind::Cancelled.is_retryable_by_default());
    }

    #[test]
    fn session_error_exposes_failure_kind() {
        let err = SessionError::from(SessionFailure::new(ErrorKind::Timeout, "no input", 0));
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
        assert_eq!(SessionError::Cancelled.kind(), Some(ErrorKind::Cancelled));
        assert_eq!(SessionError::Config("x".into()).kind(), None);
    }

    #[test]
    fn source_error_display_includes_position() {
        let err = SourceError::new(ErrorKind::Transient, "connection reset", 3);
        assert_eq!(err.to_string(), "transient error at position 3: connection reset");
    }
}
