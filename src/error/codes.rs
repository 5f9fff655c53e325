//! Error kind taxonomy and the fixed recovery-hint catalog.
//!
//! One lookup function per taxonomy: a single match over the enum rather
//! than storing the hint on every error instance, which keeps hints from
//! drifting out of sync with `kind`.

/// The six error kinds the recovery policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-range request. Never retried.
    Validation,
    /// Referenced entity does not exist. Never retried.
    NotFound,
    /// Workflow transition rejected by the state table. Never retried.
    InvalidState,
    /// Session expired or was concurrently modified. Never retried.
    Session,
    /// External dependency (durable store, transport) failed transiently.
    /// Eligible for automatic retry under backoff.
    Service,
    /// Unexpected internal failure. Eligible for automatic retry under backoff.
    Internal,
}

/// Fixed, non-sensitive recovery hint for a given error kind.
///
/// Hints never include paths, credentials, or stack frames — they are meant
/// to be shown to a caller deciding what to do next, not to a developer
/// debugging the kernel.
pub fn recovery_hint(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "fix the request and resubmit; this will not succeed on retry",
        ErrorKind::NotFound => "verify the identifier; the referenced entity does not exist",
        ErrorKind::InvalidState => {
            "the requested operation is not legal from the current state; check current_state/target_state"
        }
        ErrorKind::Session => "start a new session; the previous one can no longer be advanced",
        ErrorKind::Service => "transient failure; the caller may retry with backoff",
        ErrorKind::Internal => "unexpected failure; retried automatically, escalate if it persists",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_hint() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::InvalidState,
            ErrorKind::Session,
            ErrorKind::Service,
            ErrorKind::Internal,
        ] {
            assert!(!recovery_hint(kind).is_empty());
        }
    }
}
