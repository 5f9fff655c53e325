//! Unified error taxonomy for the orchestration kernel.
//!
//! Kept as a leaf module (no dependency on `session`, `workflow`, `queue`, or
//! `orchestrator`) so every other component can depend on it without forming
//! the import cycle the source codebase had between its orchestrator and
//! subsystem packages.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use thiserror::Error;

pub mod codes;
pub mod recovery;

pub use codes::ErrorKind;
pub use recovery::{RecoveryManager, RecoveryPolicy};

/// Result alias used throughout the kernel.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// A single context frame, pushed as an error crosses a layer boundary.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
}

/// The unified error type for the orchestration kernel.
///
/// Every error carries a [`ErrorKind`], a human-readable message, an optional
/// wrapped cause, a details map for machine-extractable context, and the
/// timestamp it was raised. Recovery hints are derived from `kind` via
/// [`codes::recovery_hint`] rather than stored, so hints can never drift from
/// the taxonomy.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: HashMap<String, String>,
    pub context: Vec<ErrorContext>,
    pub timestamp: SystemTime,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: HashMap::new(),
            context: Vec::new(),
            timestamp: SystemTime::now(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_state(
        message: impl Into<String>,
        current: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::InvalidState, message)
            .with_detail("current_state", current)
            .with_detail("target_state", target)
    }

    pub fn session_expired(session_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, "session has expired").with_detail("session_id", session_id)
    }

    pub fn concurrent_modification(session_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, "concurrent modification detected")
            .with_detail("session_id", session_id)
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Service, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Add a context frame describing the layer boundary the error crossed.
    pub fn context(mut self, message: impl Into<String>) -> Self {
        self.context.push(ErrorContext {
            message: message.into(),
        });
        self
    }

    /// Fixed recovery hint keyed on `kind`. Never includes paths, credentials,
    /// or stack frames — see [`codes::recovery_hint`].
    pub fn recovery_hint(&self) -> &'static str {
        codes::recovery_hint(self.kind)
    }

    /// Whether the recovery manager should attempt an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Service | ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation error",
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::Session => "session error",
            ErrorKind::Service => "service error",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(ErrorKind::NotFound, "row not found"),
            _ => Self::new(ErrorKind::Service, err.to_string()),
        }
        .with_source(err)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Internal, err.to_string()).with_source(err)
    }
}
