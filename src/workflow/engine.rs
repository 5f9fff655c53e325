//! Registry of per-session workflows: validates transitions against the
//! table in [`super::state`], drives `OnExit`/`OnEnter` handlers, and
//! retains an append-only history per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, OrchestratorError, Result};

use super::state::{default_handlers, transition_table, StateHandler, StateTransition, WorkflowEvent, WorkflowState};

struct SessionWorkflow {
    state: WorkflowState,
    history: Vec<StateTransition>,
    /// When `state` was entered; the watchdog compares this against the
    /// state's handler `Timeout()` to detect a stuck session.
    entered_at: DateTime<Utc>,
}

/// Drives the workflow FSM for every active session.
///
/// Each session gets its own `tokio::sync::Mutex` guarding `state` +
/// `history`; the handler registry is a separate `RwLock`, read only long
/// enough to clone the `Arc<dyn StateHandler>` out before any `.await`, so no
/// two locks are ever held across a suspension point.
pub struct WorkflowEngine {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionWorkflow>>>>,
    handlers: RwLock<HashMap<WorkflowState, Arc<dyn StateHandler>>>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        let handlers = default_handlers()
            .into_iter()
            .map(|(state, handler)| (state, Arc::from(handler)))
            .collect();
        Self {
            sessions: RwLock::new(HashMap::new()),
            handlers: RwLock::new(handlers),
        }
    }

    /// Overrides the handler for a single state. Intended for callers that
    /// need side effects (notifications, cleanup) beyond the no-op default.
    pub async fn register_handler(&self, state: WorkflowState, handler: Arc<dyn StateHandler>) {
        self.handlers.write().await.insert(state, handler);
    }

    /// Registers a workflow for `session_id` at `initial_state`. Fails if one
    /// is already registered.
    pub async fn initialize(&self, session_id: &str, initial_state: WorkflowState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(OrchestratorError::validation(format!(
                "workflow already registered for session {session_id}"
            ))
            .with_detail("session_id", session_id));
        }
        sessions.insert(
            session_id.to_string(),
            Arc::new(Mutex::new(SessionWorkflow {
                state: initial_state,
                history: Vec::new(),
                entered_at: Utc::now(),
            })),
        );
        Ok(())
    }

    pub async fn get_state(&self, session_id: &str) -> Result<WorkflowState> {
        let entry = self.entry(session_id).await?;
        Ok(entry.lock().await.state)
    }

    pub async fn get_history(&self, session_id: &str) -> Result<Vec<StateTransition>> {
        let entry = self.entry(session_id).await?;
        Ok(entry.lock().await.history.clone())
    }

    /// Whether any event transitions `from` directly to `to`.
    pub fn can_transition(&self, from: WorkflowState, to: WorkflowState) -> bool {
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
        EVENTS.iter().any(|&event| transition_table(from, event) == Some(to))
    }

    /// Explicit transition to `target`, validated against the table (any
    /// event reaching `target` from the current state is accepted).
    pub async fn transition(&self, session_id: &str, target: WorkflowState) -> Result<WorkflowState> {
        self.apply(session_id, target, None).await
    }

    /// Maps `(current_state, event)` to a target via the transition table
    /// and applies it.
    pub async fn trigger(&self, session_id: &str, event: WorkflowEvent) -> Result<WorkflowState> {
        let entry = self.entry(session_id).await?;
        let current = entry.lock().await.state;
        let target = transition_table(current, event).ok_or_else(|| {
            OrchestratorError::invalid_state(
                format!("event {event:?} is not legal from state {current}"),
                current.to_string(),
                format!("{event:?}"),
            )
        })?;
        self.apply(session_id, target, Some(event)).await
    }

    /// Removes a session's workflow entirely. Called from
    /// `Orchestrator::complete_session` and `SessionManager::delete` so the
    /// registry never grows unbounded with terminal sessions.
    pub async fn remove(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    async fn entry(&self, session_id: &str) -> Result<Arc<Mutex<SessionWorkflow>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(format!("workflow not registered: {session_id}")))
    }

    async fn apply(
        &self,
        session_id: &str,
        target: WorkflowState,
        event: Option<WorkflowEvent>,
    ) -> Result<WorkflowState> {
        let entry = self.entry(session_id).await?;
        let mut workflow = entry.lock().await;
        let from = workflow.state;

        let valid = match event {
            Some(ev) => transition_table(from, ev) == Some(target),
            None => self.can_transition(from, target),
        };
        if !valid {
            return Err(OrchestratorError::invalid_state(
                format!("cannot transition from {from} to {target}"),
                from.to_string(),
                target.to_string(),
            ));
        }

        let old_handler = self.handlers.read().await.get(&from).cloned();
        let new_handler = self.handlers.read().await.get(&target).cloned();

        let prior_entered_at = workflow.entered_at;
        workflow.state = target;
        workflow.entered_at = Utc::now();
        workflow.history.push(StateTransition {
            from,
            to: target,
            event,
            at: Utc::now(),
        });

        if let Some(handler) = &old_handler {
            if let Err(err) = handler.on_exit(session_id).await {
                warn!(session_id, %err, "on_exit failed, rolling back transition");
                workflow.state = from;
                workflow.entered_at = prior_entered_at;
                workflow.history.pop();
                return Err(err);
            }
        }
        if let Some(handler) = &new_handler {
            if let Err(err) = handler.on_enter(session_id).await {
                warn!(session_id, %err, "on_enter failed, rolling back transition");
                workflow.state = from;
                workflow.entered_at = prior_entered_at;
                workflow.history.pop();
                return Err(err);
            }
        }

        debug!(session_id, %from, to = %target, "workflow transition applied");
        Ok(target)
    }

    /// One watchdog pass: for every registered session whose current state's
    /// handler `Timeout()` is non-zero and has elapsed, triggers `Fail` for
    /// that session. Zero-timeout states (terminal states by default) are
    /// never inspected. Errors triggering `Fail` (e.g. the state somehow
    /// cannot reach `Failed`) are logged, not propagated — one stuck session
    /// must not stop the sweep over the rest.
    async fn sweep_timeouts(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for session_id in ids {
            let Ok(entry) = self.entry(&session_id).await else {
                continue;
            };
            let (state, elapsed) = {
                let workflow = entry.lock().await;
                (workflow.state, Utc::now() - workflow.entered_at)
            };
            if state.is_terminal() {
                continue;
            }
            let timeout = self
                .handlers
                .read()
                .await
                .get(&state)
                .map(|h| h.timeout())
                .unwrap_or(Duration::ZERO);
            if timeout.is_zero() {
                continue;
            }
            let Ok(elapsed_std) = elapsed.to_std() else {
                continue;
            };
            if elapsed_std >= timeout {
                warn!(session_id, %state, ?elapsed_std, ?timeout, "workflow stuck past its declared timeout, failing");
                if let Err(err) = self.trigger(&session_id, WorkflowEvent::Fail).await {
                    warn!(session_id, %err, "watchdog could not move stuck session to Failed");
                }
            }
        }
    }

    /// Spawns a background task that periodically calls [`Self::sweep_timeouts`]
    /// until the returned `watch::Sender<bool>` signals shutdown with `true`.
    /// Mirrors `SessionManager::start`'s join-on-shutdown shape. Takes an
    /// owned `Arc<Self>` (the caller clones its existing handle in) rather
    /// than borrowing it, since the spawned task outlives this call.
    pub fn spawn_watchdog(
        engine: Arc<Self>,
        poll_interval: Duration,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.sweep_timeouts().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("workflow watchdog shutting down");
                            break;
                        }
                    }
                }
            }
        });

        (shutdown_tx, handle)
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn initialize_then_trigger_start() {
        let engine = WorkflowEngine::new();
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();

        let state = engine.trigger("s1", WorkflowEvent::Start).await.unwrap();
        assert_eq!(state, WorkflowState::Initialized);
        assert_eq!(engine.get_state("s1").await.unwrap(), WorkflowState::Initialized);
    }

    #[tokio::test]
    async fn idle_process_is_the_lazy_start_path() {
        let engine = WorkflowEngine::new();
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        let state = engine.trigger("s1", WorkflowEvent::Process).await.unwrap();
        assert_eq!(state, WorkflowState::Processing);
    }

    #[tokio::test]
    async fn forbidden_transition_is_rejected_and_leaves_no_history() {
        let engine = WorkflowEngine::new();
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Start).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Process).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Complete).await.unwrap();

        let err = engine.transition("s1", WorkflowState::Processing).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
        assert_eq!(err.details.get("current_state").unwrap(), "completed");
        assert_eq!(err.details.get("target_state").unwrap(), "processing");

        // History still reflects only the three legal transitions.
        assert_eq!(engine.get_history("s1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_retries_to_initialized() {
        let engine = WorkflowEngine::new();
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Fail).await.unwrap();
        assert_eq!(engine.get_state("s1").await.unwrap(), WorkflowState::Failed);

        let state = engine.trigger("s1", WorkflowEvent::Retry).await.unwrap();
        assert_eq!(state, WorkflowState::Initialized);
    }

    struct FailingHandler;

    #[async_trait]
    impl StateHandler for FailingHandler {
        async fn on_enter(&self, _session_id: &str) -> Result<()> {
            Err(OrchestratorError::internal("boom"))
        }
        async fn on_exit(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
        fn can_transition_to(&self, _target: WorkflowState) -> bool {
            true
        }
        fn timeout(&self) -> Duration {
            Duration::ZERO
        }
    }

    #[tokio::test]
    async fn failing_on_enter_rolls_back_state_and_history() {
        let engine = WorkflowEngine::new();
        engine
            .register_handler(WorkflowState::Initialized, Arc::new(FailingHandler))
            .await;
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();

        let err = engine.trigger("s1", WorkflowEvent::Start).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(engine.get_state("s1").await.unwrap(), WorkflowState::Idle);
        assert!(engine.get_history("s1").await.unwrap().is_empty());
    }

    struct CountingHandler {
        enters: AtomicUsize,
    }

    #[async_trait]
    impl StateHandler for CountingHandler {
        async fn on_enter(&self, _session_id: &str) -> Result<()> {
            self.enters.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_exit(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
        fn can_transition_to(&self, _target: WorkflowState) -> bool {
            true
        }
        fn timeout(&self) -> Duration {
            Duration::ZERO
        }
    }

    #[tokio::test]
    async fn remove_drops_the_session_from_the_registry() {
        let engine = WorkflowEngine::new();
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        engine.remove("s1").await;
        assert!(engine.get_state("s1").await.is_err());
    }

    #[tokio::test]
    async fn on_enter_runs_exactly_once_per_transition() {
        let engine = WorkflowEngine::new();
        let handler = Arc::new(CountingHandler {
            enters: AtomicUsize::new(0),
        });
        engine
            .register_handler(WorkflowState::Processing, handler.clone())
            .await;
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Process).await.unwrap();
        assert_eq!(handler.enters.load(Ordering::SeqCst), 1);
    }

    struct ShortTimeoutHandler(Duration);

    #[async_trait]
    impl StateHandler for ShortTimeoutHandler {
        async fn on_enter(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
        async fn on_exit(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
        fn can_transition_to(&self, _target: WorkflowState) -> bool {
            true
        }
        fn timeout(&self) -> Duration {
            self.0
        }
    }

    #[tokio::test]
    async fn watchdog_fails_a_session_stuck_past_its_timeout() {
        let engine = Arc::new(WorkflowEngine::new());
        engine
            .register_handler(
                WorkflowState::Processing,
                Arc::new(ShortTimeoutHandler(Duration::from_millis(10))),
            )
            .await;
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Process).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.sweep_timeouts().await;

        assert_eq!(engine.get_state("s1").await.unwrap(), WorkflowState::Failed);
    }

    #[tokio::test]
    async fn watchdog_leaves_fresh_sessions_alone() {
        let engine = Arc::new(WorkflowEngine::new());
        engine
            .register_handler(
                WorkflowState::Processing,
                Arc::new(ShortTimeoutHandler(Duration::from_secs(3600))),
            )
            .await;
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Process).await.unwrap();

        engine.sweep_timeouts().await;
        assert_eq!(engine.get_state("s1").await.unwrap(), WorkflowState::Processing);
    }

    #[tokio::test]
    async fn watchdog_never_inspects_terminal_states() {
        let engine = Arc::new(WorkflowEngine::new());
        engine.initialize("s1", WorkflowState::Idle).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Start).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Process).await.unwrap();
        engine.trigger("s1", WorkflowEvent::Complete).await.unwrap();

        engine.sweep_timeouts().await;
        assert_eq!(engine.get_state("s1").await.unwrap(), WorkflowState::Completed);
    }
}
