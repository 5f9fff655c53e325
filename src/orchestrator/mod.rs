//! Public façade: binds the session manager, workflow engine, and queue
//! registry under one request surface, via the [`crate::container`] service
//! container.
//!
//! This module is the only one permitted to know about all three
//! subsystems at once — session, workflow, and queue stay mutually
//! unaware of each other, which is what keeps this free of the cyclic
//! import the source codebase had between its orchestrator and subsystem
//! packages (see `DESIGN.md`).

mod types;

pub use types::{DocumentationSession, FileAnalysis, StartDocumentationOptions, StartDocumentationRequest};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::container::ServiceContainer;
use crate::error::{ErrorKind, OrchestratorError, Result};
use crate::queue::{InMemoryQueueRegistry, ItemStatus, QueueProgress, QueueRegistry, TodoItem};
use crate::session::{Session, SessionFilter, SessionManager, SessionUpdate};
use crate::workflow::{WorkflowEngine, WorkflowEvent, WorkflowState};

const SESSION_MANAGER: &str = "session_manager";
const WORKFLOW_ENGINE: &str = "workflow_engine";
const QUEUE_REGISTRY: &str = "queue_registry";

/// Default `maxDepth` applied when a request supplies `0`.
const DEFAULT_MAX_DEPTH: i64 = 10;

/// Poll cadence for the workflow watchdog sweep (spec §5: "an external
/// watchdog ... part of the workflow engine's responsibility"). Frequent
/// enough to catch a stuck `Failed` state (1h default timeout) well within
/// its window without busy-polling.
const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// The orchestration kernel's public surface: `StartDocumentation`,
/// `GetSession`, `ProcessNextFile`, `CompleteSession`, per spec §6, plus a
/// couple of direct queue-population methods a caller needs between Start
/// and the ProcessNextFile loop (populating the queue is not itself part of
/// the inbound transport surface, but has to live somewhere the queue is
/// reachable from).
pub struct Orchestrator {
    container: ServiceContainer,
    watchdog_shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub async fn new(session_manager: Arc<SessionManager>) -> Self {
        Self::with_queue_registry(session_manager, Arc::new(InMemoryQueueRegistry::new())).await
    }

    pub async fn with_queue_registry(
        session_manager: Arc<SessionManager>,
        queue_registry: Arc<dyn QueueRegistry>,
    ) -> Self {
        let container = ServiceContainer::new();
        let workflow_engine = Arc::new(WorkflowEngine::new());
        let (watchdog_shutdown, _) =
            WorkflowEngine::spawn_watchdog(workflow_engine.clone(), DEFAULT_WATCHDOG_INTERVAL);

        container.register(SESSION_MANAGER, session_manager).await;
        container.register(WORKFLOW_ENGINE, workflow_engine).await;
        // The container resolves by concrete `Any` type; a trait object is
        // stored by registering the (Sized, 'static) `Arc<dyn QueueRegistry>`
        // itself as the payload, one layer of `Arc` deeper.
        container.register(QUEUE_REGISTRY, Arc::new(queue_registry)).await;

        Self {
            container,
            watchdog_shutdown,
        }
    }

    /// Stops the background watchdog sweep. Does not touch the session
    /// manager's own background expiry task, since the orchestrator does not
    /// own that manager's lifecycle (it is handed an `Arc` the caller created
    /// and may share elsewhere).
    pub fn shutdown(&self) {
        let _ = self.watchdog_shutdown.send(true);
    }

    async fn sessions(&self) -> Arc<SessionManager> {
        self.container
            .resolve::<SessionManager>(SESSION_MANAGER)
            .await
            .expect("session manager registered at construction")
    }

    async fn workflows(&self) -> Arc<WorkflowEngine> {
        self.container
            .resolve::<WorkflowEngine>(WORKFLOW_ENGINE)
            .await
            .expect("workflow engine registered at construction")
    }

    async fn queues(&self) -> Arc<dyn QueueRegistry> {
        let boxed = self
            .container
            .resolve::<Arc<dyn QueueRegistry>>(QUEUE_REGISTRY)
            .await
            .expect("queue registry registered at construction");
        (*boxed).clone()
    }

    /// Validates the request, creates a session (4.C), initializes a
    /// workflow at `Idle` (4.D), and creates an empty queue (4.B). Any
    /// failure after the session is created unwinds the earlier allocation.
    pub async fn start_documentation(&self, request: StartDocumentationRequest) -> Result<DocumentationSession> {
        validate_start_request(&request)?;
        let max_depth = coerce_max_depth(request.options.max_depth)?;

        let sessions = self.sessions().await;
        let workflows = self.workflows().await;
        let queues = self.queues().await;

        let session = sessions
            .create(&request.workspace_id, &request.project_path, Vec::new())
            .await?;
        let session_id = session.id.to_string();

        if let Err(err) = workflows.initialize(&session_id, WorkflowState::Idle).await {
            warn!(session_id, %err, "workflow init failed, unwinding session");
            let _ = sessions.delete(session.id).await;
            return Err(err);
        }

        if let Err(err) = queues.create_list(&session_id).await {
            warn!(session_id, %err, "queue creation failed, unwinding session + workflow");
            workflows.remove(&session_id).await;
            let _ = sessions.delete(session.id).await;
            return Err(err);
        }

        info!(session_id, workspace = %request.workspace_id, project = %request.project_path, max_depth, "documentation session started");
        Ok(DocumentationSession::from_session(&session))
    }

    /// Loads the session. Returns `SessionExpired` the moment `now >
    /// expires`, even if the background expiry tick has not yet flipped the
    /// persisted status.
    pub async fn get_session(&self, session_id: &str) -> Result<DocumentationSession> {
        let id = parse_id(session_id)?;
        let session = self.sessions().await.get(id).await?;

        if session.is_expired(chrono::Utc::now()) {
            return Err(OrchestratorError::session_expired(session_id));
        }

        Ok(DocumentationSession::from_session(&session))
    }

    /// Adds a file to a session's work queue. Not part of the inbound
    /// transport surface in spec §6, but the queue has to be reachable from
    /// somewhere between `start_documentation` and the `process_next_file`
    /// loop — this is that somewhere.
    ///
    /// Also bumps `Session.progress.total` to match, since file paths aren't
    /// known at `start_documentation` time (enumeration is the external
    /// `FileSystemService`'s job) — without this, `processed + |failed| <=
    /// total` would go negative slack the moment the queue outgrows a
    /// `total` fixed at session-creation time.
    pub async fn add_todo_item(&self, session_id: &str, path: impl Into<PathBuf>, priority: i64) -> Result<()> {
        let id = parse_id(session_id)?;
        self.queues().await.add_item(session_id, TodoItem::new(path, priority)).await?;

        let sessions = self.sessions().await;
        let mut session = sessions.get(id).await?;
        session.progress.total += 1;
        sessions
            .update(id, SessionUpdate::Progress(session.progress))
            .await?;
        Ok(())
    }

    pub async fn queue_progress(&self, session_id: &str) -> Result<QueueProgress> {
        self.queues().await.get_progress(session_id).await
    }

    /// Advances the workflow to `Processing` if it is still `Idle`, then
    /// dispenses the next pending file. A drained queue is reported as
    /// `Ok(None)` (the `NoMoreTodos` sentinel is not surfaced as an error to
    /// this caller — see spec §7).
    pub async fn process_next_file(&self, session_id: &str) -> Result<Option<FileAnalysis>> {
        let id = parse_id(session_id)?;
        let workflows = self.workflows().await;

        let state = workflows.get_state(session_id).await?;
        match state {
            WorkflowState::Idle => {
                workflows.trigger(session_id, WorkflowEvent::Process).await?;
                self.sync_session_status(id, WorkflowState::Processing).await?;
            }
            WorkflowState::Processing => {}
            other => {
                return Err(OrchestratorError::invalid_state(
                    "ProcessNextFile requires an Idle or Processing workflow",
                    other.to_string(),
                    WorkflowState::Processing.to_string(),
                ));
            }
        }

        let queues = self.queues().await;
        let path = match queues.get_next(session_id).await {
            Ok(path) => path,
            Err(err) if err.details.get("reason").map(String::as_str) == Some("NoMoreTodos") => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let sessions = self.sessions().await;
        let mut session = sessions.get(id).await?;
        session.progress.processed += 1;
        session.progress.current_file = Some(path.display().to_string());
        sessions
            .update(id, SessionUpdate::Progress(session.progress.clone()))
            .await?;

        Ok(Some(FileAnalysis::skeleton(path)))
    }

    /// Reports the outcome of analysis performed externally for one
    /// previously-dispensed file (spec §2's data-flow: "client → (performs
    /// analysis externally) → reports status → Queue: update item status;
    /// Session: progress++"). Moves the queue item to its terminal status via
    /// 4.B's `UpdateProgress`, and, for `Failed`, records the path in
    /// `Session.progress.failed_files` so the session's own failure list
    /// isn't silently dropped. A report for a path the queue no longer has
    /// dispensed (never added, already terminal, or stale/duplicate) is a
    /// no-op at the queue layer — see `QueueRegistry::update_progress`.
    pub async fn report_file_result(
        &self,
        session_id: &str,
        path: impl Into<PathBuf>,
        status: ItemStatus,
    ) -> Result<()> {
        let id = parse_id(session_id)?;
        let path = path.into();

        self.queues().await.update_progress(session_id, &path, status).await?;

        if status == ItemStatus::Failed {
            let sessions = self.sessions().await;
            let mut session = sessions.get(id).await?;
            session.progress.failed_files.push(path.display().to_string());
            sessions
                .update(id, SessionUpdate::Progress(session.progress.clone()))
                .await?;
        }

        Ok(())
    }

    /// Transitions `Processing`/`Paused` to `Completed`, persists the final
    /// session status, and tears down the queue and workflow entry
    /// best-effort (a queue teardown failure is logged, not propagated —
    /// the session has already completed from the caller's point of view).
    pub async fn complete_session(&self, session_id: &str) -> Result<()> {
        let id = parse_id(session_id)?;
        let workflows = self.workflows().await;

        let current = workflows.get_state(session_id).await?;
        let target_event = match current {
            WorkflowState::Processing | WorkflowState::Paused => WorkflowEvent::Complete,
            other => {
                return Err(OrchestratorError::invalid_state(
                    "CompleteSession requires a Processing or Paused workflow",
                    other.to_string(),
                    WorkflowState::Completed.to_string(),
                ));
            }
        };
        workflows.trigger(session_id, target_event).await?;

        self.sessions()
            .await
            .update(id, SessionUpdate::Status(crate::session::SessionStatus::Completed))
            .await?;

        if let Err(err) = self.queues().await.delete_list(session_id).await {
            warn!(session_id, %err, "best-effort queue teardown failed at session completion");
        }
        workflows.remove(session_id).await;

        Ok(())
    }

    /// Hard-deletes a session: storage row, cache entry, queue, and
    /// workflow registry entry. Unlike expiry, this is caller-initiated and
    /// irreversible.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let id = parse_id(session_id)?;
        self.sessions().await.delete(id).await?;
        if let Err(err) = self.queues().await.delete_list(session_id).await {
            warn!(session_id, %err, "queue teardown failed during session delete");
        }
        self.workflows().await.remove(session_id).await;
        Ok(())
    }

    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        self.sessions().await.list(filter).await
    }

    async fn sync_session_status(&self, id: Uuid, state: WorkflowState) -> Result<()> {
        let status = workflow_state_to_session_status(state);
        self.sessions()
            .await
            .update(id, SessionUpdate::Status(status))
            .await?;
        Ok(())
    }
}

/// `Session.status` is driven by the workflow engine, not set directly by
/// callers (spec §3 invariant: "`status` transitions only via the workflow
/// engine"). `WorkflowState::Cancelled` has no dedicated counterpart in the
/// persisted `SessionStatus` enum; mapped to `Failed` (documented in
/// `DESIGN.md` as the resolution to the two-overlapping-session-interfaces
/// open question — one representation at the seam, no second enum).
fn workflow_state_to_session_status(state: WorkflowState) -> crate::session::SessionStatus {
    use crate::session::SessionStatus;
    match state {
        WorkflowState::Idle | WorkflowState::Initialized => SessionStatus::Pending,
        WorkflowState::Processing | WorkflowState::Paused => SessionStatus::InProgress,
        WorkflowState::Completed => SessionStatus::Completed,
        WorkflowState::Failed | WorkflowState::Cancelled => SessionStatus::Failed,
    }
}

fn validate_start_request(request: &StartDocumentationRequest) -> Result<()> {
    if request.workspace_id.trim().is_empty() {
        return Err(OrchestratorError::validation("workspace_id must not be empty"));
    }
    if request.project_path.trim().is_empty() {
        return Err(OrchestratorError::validation("project_path must not be empty"));
    }
    Ok(())
}

fn coerce_max_depth(max_depth: i64) -> Result<i64> {
    match max_depth {
        0 => Ok(DEFAULT_MAX_DEPTH),
        d if d < 0 => Err(OrchestratorError::validation(format!(
            "max_depth must be >= 0, got {d}"
        ))),
        d => Ok(d),
    }
}

fn parse_id(session_id: &str) -> Result<Uuid> {
    Uuid::parse_str(session_id)
        .map_err(|_| OrchestratorError::validation(format!("malformed session id: {session_id}")))
}
