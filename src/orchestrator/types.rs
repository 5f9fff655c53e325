//! Public request/response shapes for the orchestrator façade. Kept separate
//! from `mod.rs` so the wire-facing vocabulary is easy to scan without the
//! binding logic around it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// `StartDocumentation` request body, per spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDocumentationRequest {
    pub workspace_id: String,
    pub project_path: String,
    #[serde(default)]
    pub options: StartDocumentationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDocumentationOptions {
    #[serde(default)]
    pub include_private: bool,
    /// `0` is coerced to `10`; negative values are a validation error.
    #[serde(default)]
    pub max_depth: i64,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for StartDocumentationOptions {
    fn default() -> Self {
        Self {
            include_private: false,
            max_depth: 0,
            file_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Public view of a [`Session`] returned by the façade. Deliberately
/// narrower than the durable record — no cache/version internals leak past
/// this seam.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentationSession {
    pub session_id: String,
    pub workspace_id: String,
    pub project_path: String,
    pub status: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub current_file: Option<String>,
    pub failed_files: Vec<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DocumentationSession {
    /// `Session.status` already mirrors the workflow state (every mutation
    /// to it goes through the orchestrator in lockstep with a workflow
    /// transition), so this view is built from the durable record alone —
    /// no separate workflow-engine lookup needed, which also means it keeps
    /// working after `complete_session` has released the workflow entry.
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.to_string(),
            workspace_id: session.workspace.clone(),
            project_path: session.module.clone(),
            status: session.status.to_string(),
            total_files: session.progress.total,
            processed_files: session.progress.processed,
            current_file: session.progress.current_file.clone(),
            failed_files: session.progress.failed_files.clone(),
            version: session.version,
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        }
    }
}

/// Result of analyzing one file. The orchestrator only ever returns the
/// skeleton (`file_path` populated, the rest empty) — filling in `content`,
/// `language`, and the rest is the external analyzer's job (spec §6); the
/// kernel's role is to dispense and record, never to analyze.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileAnalysis {
    pub file_path: PathBuf,
    pub content: String,
    pub language: Option<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub dependencies: Vec<String>,
    pub complexity: Option<u32>,
    pub token_count: Option<u32>,
}

impl FileAnalysis {
    pub fn skeleton(file_path: PathBuf) -> Self {
        Self {
            file_path,
            ..Default::default()
        }
    }
}
