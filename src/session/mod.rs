//! Durable session records: identity, progress, notes, and lifecycle status.
//!
//! A documentation job is modeled as a single [`Session`] combining identity,
//! status, and progress in one persisted record, rather than splitting state
//! across separate read/write interfaces.

pub mod cache;
pub mod manager;
pub mod storage;

pub use cache::SessionCache;
pub use manager::{SessionManager, SessionManagerConfig};
pub use storage::{SessionStore, SqliteSessionStore};

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a documentation session, advanced only by the
/// workflow engine (see [`crate::workflow`]) or by expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Aggregate progress counters, embedded in [`Session`] and serialized as a
/// single opaque JSON blob alongside [`SessionNote`]s (see
/// [`SessionProgressBlob`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub current_file: Option<String>,
    pub failed_files: Vec<String>,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// `processed + |failed| <= total` — checked at every mutation site
    /// rather than trusted, since it is a cross-field invariant sqlx cannot
    /// enforce for us.
    pub fn is_consistent(&self) -> bool {
        self.processed + self.failed_files.len() <= self.total
    }
}

/// A record linking a completed file to its stored memory artefact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionNote {
    pub file_path: String,
    pub memory_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Notes are persisted alongside `progress` in the same JSON blob rather than
/// dropped, so the `documentation_sessions.progress` column holds this whole
/// struct, not just [`Progress`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionProgressBlob {
    pub progress: Progress,
    pub notes: Vec<SessionNote>,
}

/// A documentation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub workspace: String,
    pub module: String,
    pub status: SessionStatus,
    pub file_paths: Vec<PathBuf>,
    pub progress: Progress,
    pub notes: Vec<SessionNote>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Soft-terminated by expiry only from these two statuses.
    pub fn expirable(&self) -> bool {
        matches!(self.status, SessionStatus::Pending | SessionStatus::InProgress)
    }
}

/// A mutation applied atomically by [`SessionManager::update`].
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Status(SessionStatus),
    Progress(Progress),
    CurrentFile(Option<String>),
    Note(SessionNote),
}

/// Conjunctive filter for [`SessionManager::list`]. Every field is optional;
/// an absent field imposes no constraint. Always applied via a parameterised
/// query, never string-concatenated.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub workspace: Option<String>,
    pub status: Option<SessionStatus>,
    pub module: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Per-request metadata the orchestrator façade accepts; kept here since it
/// shapes what [`SessionManager::create`] persists.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions(pub HashMap<String, String>);
