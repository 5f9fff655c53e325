//! In-memory implementation of [`super::QueueRegistry`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{ErrorKind, OrchestratorError, Result};

use super::{ItemStatus, NoMoreTodos, QueueProgress, QueueRegistry, TodoItem};

/// A heap entry carrying only what ordering needs; the item payload lives in
/// `QueueState::pending`, keyed by path, so the heap stays cheap to clone.
struct HeapEntry {
    priority: i64,
    seq: u64,
    path: PathBuf,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; on a tie, lower insertion sequence (earlier)
        // first. BinaryHeap is a max-heap, so we reverse the sequence term.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    pending: HashMap<PathBuf, TodoItem>,
    in_progress_by_path: HashMap<PathBuf, TodoItem>,
    terminal: HashMap<PathBuf, TodoItem>,
    known_paths: HashSet<PathBuf>,
    progress: QueueProgress,
    next_seq: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            in_progress_by_path: HashMap::new(),
            terminal: HashMap::new(),
            known_paths: HashSet::new(),
            progress: QueueProgress::default(),
            next_seq: 0,
        }
    }
}

/// Registry of per-session queues, one [`parking_lot::Mutex`] per queue plus
/// one guarding the registry's own membership (create/delete of whole
/// queues). No lock is ever held across `.await` — every operation here is
/// synchronous.
pub struct InMemoryQueueRegistry {
    queues: parking_lot::RwLock<HashMap<String, Arc<Mutex<QueueState>>>>,
}

impl InMemoryQueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    fn get_queue(&self, session_id: &str) -> Result<Arc<Mutex<QueueState>>> {
        self.queues
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(format!("queue not found: {session_id}")))
    }
}

impl Default for InMemoryQueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueRegistry for InMemoryQueueRegistry {
    async fn create_list(&self, session_id: &str) -> Result<()> {
        let mut queues = self.queues.write();
        if queues.contains_key(session_id) {
            return Err(OrchestratorError::validation(format!(
                "queue already exists for session {session_id}"
            ))
            .with_detail("session_id", session_id));
        }
        queues.insert(session_id.to_string(), Arc::new(Mutex::new(QueueState::new())));
        Ok(())
    }

    async fn add_item(&self, session_id: &str, mut item: TodoItem) -> Result<()> {
        let queue = self.get_queue(session_id)?;
        let mut state = queue.lock();

        if state.known_paths.contains(&item.path) {
            return Err(OrchestratorError::validation(format!(
                "item already exists in queue: {}",
                item.path.display()
            )));
        }

        item.status = ItemStatus::Pending;
        let seq = state.next_seq;
        state.next_seq += 1;

        state.known_paths.insert(item.path.clone());
        state.heap.push(HeapEntry {
            priority: item.priority,
            seq,
            path: item.path.clone(),
        });
        state.pending.insert(item.path.clone(), item);
        state.progress.total += 1;
        state.progress.pending += 1;
        Ok(())
    }

    async fn get_next(&self, session_id: &str) -> Result<PathBuf> {
        let queue = self.get_queue(session_id)?;
        let mut state = queue.lock();

        let entry = state.heap.pop().ok_or_else(|| {
            let sentinel = NoMoreTodos {
                session_id: session_id.to_string(),
            };
            OrchestratorError::new(ErrorKind::NotFound, sentinel.to_string())
                .with_detail("reason", "NoMoreTodos")
                .with_detail("session_id", session_id)
        })?;

        let mut item = state
            .pending
            .remove(&entry.path)
            .expect("heap and pending map must stay in sync");
        item.status = ItemStatus::InProgress;
        let path = item.path.clone();

        state.progress.move_item(ItemStatus::Pending, ItemStatus::InProgress);
        state.in_progress_by_path.insert(path.clone(), item);

        Ok(path)
    }

    async fn update_progress(
        &self,
        session_id: &str,
        path: &PathBuf,
        status: ItemStatus,
    ) -> Result<()> {
        let queue = self.get_queue(session_id)?;
        let mut state = queue.lock();

        // Items not currently dispensed (never added, already terminal, or a
        // stale/duplicate report) are silently treated as a no-op success —
        // the caller may report completion without a prior lookup.
        let Some(mut item) = state.in_progress_by_path.remove(path) else {
            return Ok(());
        };

        item.status = status;
        state.progress.move_item(ItemStatus::InProgress, status);
        state.terminal.insert(path.clone(), item);
        Ok(())
    }

    async fn get_progress(&self, session_id: &str) -> Result<QueueProgress> {
        let queue = self.get_queue(session_id)?;
        Ok(queue.lock().progress)
    }

    async fn delete_list(&self, session_id: &str) -> Result<()> {
        let mut queues = self.queues.write();
        queues
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found(format!("queue not found: {session_id}")))
    }
}
