//! Error taxonomy for the dispatch core.
//!
//! Every failure a tool call can hit maps onto one `BridgeError` variant.
//! Local failures (`Parse`, `TypeMismatch`) are produced before any network
//! interaction; routing and transport failures carry enough context for an
//! agent to decide whether retrying later makes sense.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// A payload string could not be decoded as JSON nor as a literal mapping.
    #[error("{field}: failed to parse string payload. JSON error: {json}; literal error: {literal}")]
    Parse {
        field: String,
        json: String,
        literal: String,
    },

    /// A value decoded fine but has the wrong shape, or the input type was wrong.
    #[error("{field}: {detail}")]
    TypeMismatch { field: String, detail: String },

    #[error("no editor instance is connected")]
    NoInstanceAvailable,

    #[error("instance '{selector}' not found: {reason}")]
    InstanceNotFound { selector: String, reason: String },

    /// Transport-level failure. `after_send` is true when the command may
    /// already have reached the peer.
    #[error("connection error: {message}")]
    Connection { message: String, after_send: bool },

    #[error("no response from instance within {}ms", .after.as_millis())]
    TimedOut { after: Duration },

    /// The peer explicitly reported a failure.
    #[error("{0}")]
    Peer(String),
}

/// Stable classification tag, used in failure results and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    TypeMismatch,
    NoInstanceAvailable,
    InstanceNotFound,
    Connection,
    TimedOut,
    Peer,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse_error",
            Self::TypeMismatch => "type_mismatch",
            Self::NoInstanceAvailable => "no_instance_available",
            Self::InstanceNotFound => "instance_not_found",
            Self::Connection => "connection_error",
            Self::TimedOut => "timed_out",
            Self::Peer => "peer_error",
        }
    }
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::NoInstanceAvailable => ErrorKind::NoInstanceAvailable,
            Self::InstanceNotFound { .. } => ErrorKind::InstanceNotFound,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Peer(_) => ErrorKind::Peer,
        }
    }

    pub fn type_mismatch(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub fn connection(message: impl Into<String>, after_send: bool) -> Self {
        Self::Connection {
            message: message.into(),
            after_send,
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_both_stages() {
        let err = BridgeError::Parse {
            field: "properties".into(),
            json: "expected value at line 1 column 1".into(),
            literal: "unexpected identifier 'not' at offset 0".into(),
        };
        let text = err.to_string();
        assert!(text.starts_with("properties:"));
        assert!(text.contains("JSON error: expected value"));
        assert!(text.contains("literal error: unexpected identifier"));
    }

    #[test]
    fn timeout_message_reports_millis() {
        let err = BridgeError::TimedOut {
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "no response from instance within 1500ms");
        assert_eq!(err.kind().as_str(), "timed_out");
    }
}
