//! # Error Definitions
//!
//! Two distinct families live here:
//!
//! - [`ProtocolError`]: the local side failed to read or build a frame.
//!   These never cross the wire; a malformed inbound frame is logged and dropped.
//! - [`ErrorBody`]: the *remote* side failed to execute a request. This is the
//!   `error` member of a response envelope.

use serde::Deserialize;
use serde::Serialize;

/// Failures while decoding or encoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The text was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),
    /// The JSON was valid but did not match the canonical envelope.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A request carried a parameter bag that does not fit the command.
    #[error("invalid params for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// A specialized Result type for envelope operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Machine-readable failure category carried in an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No built-in command or registered action has this name.
    UnknownMethod,
    /// The parameter bag failed validation.
    InvalidParams,
    /// A registered getter, action or callback failed.
    HandlerError,
    /// The addressed key, element, action or flag does not exist.
    NotFound,
    /// A collaborator needed for this command is not installed.
    Unavailable,
    /// No response arrived in time.
    Timeout,
    /// The link carrying the request went away.
    Disconnected,
    /// Anything else.
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownMethod => "unknown_method",
            Self::InvalidParams => "invalid_params",
            Self::HandlerError => "handler_error",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Disconnected => "disconnected",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(ErrorCode::UnknownMethod, format!("Unknown method: {method}"))
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorBody {}

impl From<ProtocolError> for ErrorBody {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidParams { .. } => Self::new(ErrorCode::InvalidParams, e.to_string()),
            _ => Self::new(ErrorCode::Internal, e.to_string()),
        }
    }
}
