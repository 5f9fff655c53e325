//! Per-session priority work queue.
//!
//! Each session owns an independent queue keyed by path. Dispensation is
//! drawn from a max-heap rather than a flat map, so `get_next` is O(log n)
//! instead of a linear scan over pending items.

mod manager;

pub use manager::InMemoryQueueRegistry;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Status of a single [`TodoItem`] as it moves through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Skipped,
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ItemStatus {
    /// Terminal item states are not re-dispensed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Skipped)
    }
}

/// An entry in a session's work queue. Unique per-session by `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub path: PathBuf,
    pub priority: i64,
    pub status: ItemStatus,
    pub metadata: HashMap<String, String>,
}

impl TodoItem {
    pub fn new(path: impl Into<PathBuf>, priority: i64) -> Self {
        Self {
            path: path.into(),
            priority,
            status: ItemStatus::Pending,
            metadata: HashMap::new(),
        }
    }
}

/// Aggregate counters for a queue. `Σ counters == total` always holds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueProgress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl QueueProgress {
    fn counter_mut(&mut self, status: ItemStatus) -> &mut usize {
        match status {
            ItemStatus::Pending => &mut self.pending,
            ItemStatus::InProgress => &mut self.in_progress,
            ItemStatus::Complete => &mut self.complete,
            ItemStatus::Failed => &mut self.failed,
            ItemStatus::Skipped => &mut self.skipped,
        }
    }

    fn move_item(&mut self, from: ItemStatus, to: ItemStatus) {
        *self.counter_mut(from) -= 1;
        *self.counter_mut(to) += 1;
    }
}

/// The distinguished "queue is drained of Pending work" condition.
#[derive(Debug, Clone)]
pub struct NoMoreTodos {
    pub session_id: String,
}

impl std::fmt::Display for NoMoreTodos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no more todos for session {}", self.session_id)
    }
}

/// Registry of per-session priority queues.
///
/// All operations take the target queue's lock; no operation blocks on I/O
/// while holding it (there is none to block on — the queue is in-memory
/// only, see the open question on queue durability in DESIGN.md).
#[async_trait]
pub trait QueueRegistry: Send + Sync {
    /// Fails with `ErrorKind::Validation` (AlreadyExists) if a queue for this
    /// session is already registered.
    async fn create_list(&self, session_id: &str) -> Result<()>;

    /// Defaults `item.status` to `Pending` semantics are enforced by
    /// [`TodoItem::new`] / [`Default`]; a duplicate path is a validation error.
    async fn add_item(&self, session_id: &str, item: TodoItem) -> Result<()>;

    /// Pops the highest-priority Pending item, atomically marking it
    /// InProgress and removing it from further eligibility. Ties break on
    /// insertion order. Returns `Err` wrapping [`NoMoreTodos`] (as a
    /// `ErrorKind::NotFound` with `"NoMoreTodos"` in `details`) when the
    /// queue has no Pending item left.
    async fn get_next(&self, session_id: &str) -> Result<PathBuf>;

    /// Updates for paths not currently dispensed (never added, already
    /// terminal, or a stale/duplicate report) are silently ignored — the
    /// caller may report completion without tracking dispensation state
    /// itself.
    async fn update_progress(&self, session_id: &str, path: &PathBuf, status: ItemStatus) -> Result<()>;

    /// A copy of the aggregate counters.
    async fn get_progress(&self, session_id: &str) -> Result<QueueProgress>;

    async fn delete_list(&self, session_id: &str) -> Result<()>;
}
