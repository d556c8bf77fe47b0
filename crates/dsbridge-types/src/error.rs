//! Structured error model for boundary operations.
//!
//! [`BridgeError`] carries a classification, a stable machine-readable code,
//! and the human-readable message that is surfaced to the host. Construct
//! via kind-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a boundary failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed handle, unknown format id, bad schema bytes, wrong handle kind.
    InvalidArgument,
    /// The handle does not resolve to a live object.
    NotFound,
    /// The native engine reported a failure (I/O, decode, write, partitioning).
    EngineFailure,
    /// A host callback raised or returned an error.
    HostCallbackFailure,
    /// The calling thread could not be attached to the host runtime.
    RuntimeAttachFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::EngineFailure => "engine_failure",
            Self::HostCallbackFailure => "host_callback_failure",
            Self::RuntimeAttachFailure => "runtime_attach_failure",
        };
        f.write_str(s)
    }
}

/// Error raised by any operation that crosses the host boundary.
///
/// The host only ever observes [`BridgeError::message`]; `kind` and `code`
/// exist for native-side logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {code}: {message}")]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BridgeError {
    fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Argument rejected before any state was touched.
    #[must_use]
    pub fn invalid_argument(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, code, message)
    }

    /// Handle or object lookup failed.
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    /// Native engine failure.
    #[must_use]
    pub fn engine(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EngineFailure, code, message)
    }

    /// Failure raised by a host callback.
    #[must_use]
    pub fn host_callback(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HostCallbackFailure, code, message)
    }

    /// The current thread could not be attached to the host runtime.
    #[must_use]
    pub fn runtime_attach(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeAttachFailure, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The message surfaced to the host, without kind or code decoration.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BridgeError>;
