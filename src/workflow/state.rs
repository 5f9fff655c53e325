//! Workflow states, events, the transition table, and per-state handlers.
//!
//! Kept as a single leaf module rather than scattering the state enum, the
//! event enum, and the handler registry across separate files — the three
//! are never useful apart from one another.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A lifecycle state of a documentation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Idle,
    Initialized,
    Processing,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Default watchdog timeout for a state; `Duration::ZERO` means no
    /// timeout (terminal states, and any state not listed here).
    pub fn default_timeout(self) -> Duration {
        match self {
            Self::Idle => Duration::from_secs(24 * 3600),
            Self::Processing => Duration::from_secs(4 * 3600),
            Self::Failed => Duration::from_secs(3600),
            _ => Duration::ZERO,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initialized => "initialized",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// An event that may drive a transition, per the table in [`transition_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Start,
    Process,
    Complete,
    Fail,
    Pause,
    Resume,
    Cancel,
    Retry,
}

/// `(from, event) -> to`, exactly as laid out in the state table. `Idle` +
/// `Process` is the one irregular entry: workflows normally begin
/// `Idle -> Initialized` via `Start`, but the orchestrator's lazy-start path
/// goes directly `Idle -> Processing`.
pub fn transition_table(from: WorkflowState, event: WorkflowEvent) -> Option<WorkflowState> {
    use WorkflowEvent::*;
    use WorkflowState::*;

    match (from, event) {
        (Idle, Start) => Some(Initialized),
        (Idle, Process) => Some(Processing),
        (Idle, Fail) => Some(Failed),
        (Idle, Cancel) => Some(Cancelled),

        (Initialized, Process) => Some(Processing),
        (Initialized, Fail) => Some(Failed),
        (Initialized, Cancel) => Some(Cancelled),

        (Processing, Complete) => Some(Completed),
        (Processing, Fail) => Some(Failed),
        (Processing, Pause) => Some(Paused),
        (Processing, Cancel) => Some(Cancelled),

        (Paused, Fail) => Some(Failed),
        (Paused, Resume) => Some(Processing),
        (Paused, Cancel) => Some(Cancelled),

        (Failed, Retry) => Some(Initialized),

        _ => None,
    }
}

/// One entry in a workflow's history: an applied transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub event: Option<WorkflowEvent>,
    pub at: DateTime<Utc>,
}

/// Lifecycle hooks for a single [`WorkflowState`]. Implementations MUST be
/// idempotent — a crash between persisting a transition and this call
/// completing means the workflow may be restarted and the hook re-run.
#[async_trait]
pub trait StateHandler: Send + Sync {
    async fn on_enter(&self, session_id: &str) -> Result<()>;
    async fn on_exit(&self, session_id: &str) -> Result<()>;
    fn can_transition_to(&self, target: WorkflowState) -> bool;
    fn timeout(&self) -> Duration;
}

/// A [`StateHandler`] with no side effects, used for every state unless a
/// caller registers something more specific via
/// [`super::engine::WorkflowEngine::register_handler`].
pub struct NoopHandler {
    state: WorkflowState,
}

impl NoopHandler {
    pub fn new(state: WorkflowState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl StateHandler for NoopHandler {
    async fn on_enter(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    async fn on_exit(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    fn can_transition_to(&self, target: WorkflowState) -> bool {
        const EVENTS: [WorkflowEvent; 8] = [
            WorkflowEvent::Start,
            WorkflowEvent::Process,
            WorkflowEvent::Complete,
            WorkflowEvent::Fail,
            WorkflowEvent::Pause,
            WorkflowEvent::Resume,
            WorkflowEvent::Cancel,
            WorkflowEvent::Retry,
        ];
        EVENTS
            .iter()
            .any(|&event| transition_table(self.state, event) == Some(target))
    }

    fn timeout(&self) -> Duration {
        self.state.default_timeout()
    }
}

pub fn default_handlers() -> HashMap<WorkflowState, Box<dyn StateHandler>> {
    use WorkflowState::*;
    let mut handlers: HashMap<WorkflowState, Box<dyn StateHandler>> = HashMap::new();
    for state in [Idle, Initialized, Processing, Completed, Failed, Paused, Cancelled] {
        handlers.insert(state, Box::new(NoopHandler::new(state)));
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_process_is_the_lazy_start_shortcut() {
        assert_eq!(
            transition_table(WorkflowState::Idle, WorkflowEvent::Process),
            Some(WorkflowState::Processing)
        );
    }

    #[test]
    fn terminal_states_accept_no_events() {
        for event in [
            WorkflowEvent::Start,
            WorkflowEvent::Process,
            WorkflowEvent::Complete,
            WorkflowEvent::Fail,
            WorkflowEvent::Pause,
            WorkflowEvent::Resume,
            WorkflowEvent::Cancel,
            WorkflowEvent::Retry,
        ] {
            assert_eq!(transition_table(WorkflowState::Completed, event), None);
            assert_eq!(transition_table(WorkflowState::Cancelled, event), None);
        }
    }

    #[test]
    fn failed_only_accepts_retry() {
        assert_eq!(
            transition_table(WorkflowState::Failed, WorkflowEvent::Retry),
            Some(WorkflowState::Initialized)
        );
        assert_eq!(transition_table(WorkflowState::Failed, WorkflowEvent::Start), None);
    }

    #[test]
    fn default_timeouts_match_the_table() {
        assert_eq!(WorkflowState::Idle.default_timeout(), Duration::from_secs(86400));
        assert_eq!(WorkflowState::Processing.default_timeout(), Duration::from_secs(14400));
        assert_eq!(WorkflowState::Failed.default_timeout(), Duration::from_secs(3600));
        assert_eq!(WorkflowState::Completed.default_timeout(), Duration::ZERO);
    }
}
