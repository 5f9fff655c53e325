//! Durable storage for [`Session`] records against the `documentation_sessions`
//! table, using a short-lived connection per operation and a typed
//! row-mapping step that keeps SQL errors from leaking storage-specific
//! column names past this module.

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{ErrorKind, OrchestratorError, Result};

use super::{Progress, Session, SessionFilter, SessionProgressBlob, SessionStatus};

/// Durable session storage. Every operation uses a short-lived connection
/// drawn from the pool; no transaction is held across an `.await` boundary
/// beyond a single statement.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<()>;
    async fn fetch(&self, id: Uuid) -> Result<Option<Session>>;
    /// Returns `true` iff exactly one row matched `id` and `expected_version`.
    async fn update_if_version_matches(&self, session: &Session, expected_version: i64) -> Result<bool>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>>;
    /// Bulk-transitions expired rows to `Expired`; returns the count touched.
    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64>;
    /// Count of sessions not yet in a terminal status — used to enforce the
    /// concurrently-active-sessions ceiling.
    async fn count_active(&self) -> Result<i64>;
}

/// SQLite-backed implementation (the default backend; `postgres` feature
/// swaps the pool type but not the SQL, which sticks to ANSI-portable
/// constructs for that reason).
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| OrchestratorError::new(ErrorKind::Service, e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// A `:memory:` database is private to the connection that opened it, so
    /// a pool with more than one connection would hand different callers
    /// different, empty databases. Pinned to exactly one connection for that
    /// reason — this store is for tests and short-lived fixtures, never the
    /// production backend (see `connect`).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| OrchestratorError::new(ErrorKind::Service, e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documentation_sessions (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                module_name TEXT NOT NULL,
                status TEXT NOT NULL,
                file_paths TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                progress TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documentation_sessions_expires_at \
             ON documentation_sessions (expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documentation_sessions_workspace_status \
             ON documentation_sessions (workspace_id, status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
        let id: String = row.try_get("id")?;
        let file_paths: String = row.try_get("file_paths")?;
        let progress: String = row.try_get("progress")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let expires_at: String = row.try_get("expires_at")?;

        let blob: SessionProgressBlob = serde_json::from_str(&progress)?;
        let file_paths: Vec<PathBuf> = serde_json::from_str(&file_paths)?;

        Ok(Session {
            id: Uuid::parse_str(&id).map_err(|e| OrchestratorError::internal(e.to_string()))?,
            workspace: row.try_get("workspace_id")?,
            module: row.try_get("module_name")?,
            status: status_from_str(&status)?,
            file_paths,
            progress: blob.progress,
            notes: blob.notes,
            version: row.try_get("version")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            expires_at: parse_timestamp(&expires_at)?,
        })
    }
}

fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Pending => "pending",
        SessionStatus::InProgress => "in_progress",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Expired => "expired",
    }
}

fn status_from_str(s: &str) -> Result<SessionStatus> {
    Ok(match s {
        "pending" => SessionStatus::Pending,
        "in_progress" => SessionStatus::InProgress,
        "completed" => SessionStatus::Completed,
        "failed" => SessionStatus::Failed,
        "expired" => SessionStatus::Expired,
        other => {
            return Err(OrchestratorError::internal(format!(
                "unknown session status in storage: {other}"
            )))
        }
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OrchestratorError::internal(e.to_string()))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let file_paths = serde_json::to_string(&session.file_paths)?;
        let blob = SessionProgressBlob {
            progress: session.progress.clone(),
            notes: session.notes.clone(),
        };
        let progress = serde_json::to_string(&blob)?;

        sqlx::query(
            r#"
            INSERT INTO documentation_sessions
                (id, workspace_id, module_name, status, file_paths, version,
                 created_at, updated_at, expires_at, progress)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.workspace)
        .bind(&session.module)
        .bind(status_to_str(session.status))
        .bind(file_paths)
        .bind(session.version)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(progress)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM documentation_sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn update_if_version_matches(&self, session: &Session, expected_version: i64) -> Result<bool> {
        let file_paths = serde_json::to_string(&session.file_paths)?;
        let blob = SessionProgressBlob {
            progress: session.progress.clone(),
            notes: session.notes.clone(),
        };
        let progress = serde_json::to_string(&blob)?;

        let result = sqlx::query(
            r#"
            UPDATE documentation_sessions
            SET workspace_id = ?1, module_name = ?2, status = ?3, file_paths = ?4,
                version = ?5, updated_at = ?6, expires_at = ?7, progress = ?8
            WHERE id = ?9 AND version = ?10
            "#,
        )
        .bind(&session.workspace)
        .bind(&session.module)
        .bind(status_to_str(session.status))
        .bind(file_paths)
        .bind(session.version)
        .bind(session.updated_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(progress)
        .bind(session.id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM documentation_sessions WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        // Column names are fixed and templated; every value is bound as a
        // placeholder, never interpolated.
        let mut sql = String::from("SELECT * FROM documentation_sessions WHERE 1 = 1");
        if filter.workspace.is_some() {
            sql.push_str(" AND workspace_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.module.is_some() {
            sql.push_str(" AND module_name = ?");
        }
        if filter.created_after.is_some() {
            sql.push_str(" AND created_at > ?");
        }
        if filter.created_before.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }
        if filter.offset.is_some() {
            sql.push_str(" OFFSET ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(ref workspace) = filter.workspace {
            query = query.bind(workspace);
        }
        if let Some(status) = filter.status {
            query = query.bind(status_to_str(status));
        }
        if let Some(ref module) = filter.module {
            query = query.bind(module);
        }
        if let Some(created_after) = filter.created_after {
            query = query.bind(created_after.to_rfc3339());
        }
        if let Some(created_before) = filter.created_before {
            query = query.bind(created_before.to_rfc3339());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }
        if let Some(offset) = filter.offset {
            query = query.bind(offset);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_session).collect()
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE documentation_sessions
            SET status = 'expired', updated_at = ?1
            WHERE expires_at < ?1 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM documentation_sessions WHERE status IN ('pending', 'in_progress')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }
}

// Kept for parity with `Progress::new` usage in tests below.
#[cfg(test)]
fn test_session(workspace: &str) -> Session {
    let now = Utc::now();
    Session {
        id: Uuid::new_v4(),
        workspace: workspace.to_string(),
        module: "mod".to_string(),
        status: SessionStatus::Pending,
        file_paths: vec![PathBuf::from("a.rs")],
        progress: Progress::new(1),
        notes: Vec::new(),
        version: 1,
        created_at: now,
        updated_at: now,
        expires_at: now + chrono::Duration::hours(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_fetch_round_trips() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        let session = test_session("ws-1");
        store.insert(&session).await.unwrap();

        let loaded = store.fetch(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.workspace, "ws-1");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.progress.total, 1);
    }

    #[tokio::test]
    async fn update_fails_on_version_mismatch() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        let session = test_session("ws-1");
        store.insert(&session).await.unwrap();

        let mut updated = session.clone();
        updated.version = 2;
        updated.status = SessionStatus::InProgress;

        // Stale expected_version (claiming current is 5, but it's really 1)
        let applied = store.update_if_version_matches(&updated, 5).await.unwrap();
        assert!(!applied);

        let applied = store.update_if_version_matches(&updated, 1).await.unwrap();
        assert!(applied);
    }

    #[tokio::test]
    async fn expire_sessions_transitions_past_ttl_rows() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        let mut session = test_session("ws-1");
        session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.insert(&session).await.unwrap();

        let count = store.expire_sessions(Utc::now()).await.unwrap();
        assert_eq!(count, 1);

        let loaded = store.fetch(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn list_filters_by_workspace_and_status() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        let a = test_session("ws-a");
        let mut b = test_session("ws-b");
        b.status = SessionStatus::Completed;
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let filter = SessionFilter {
            workspace: Some("ws-a".to_string()),
            ..Default::default()
        };
        let results = store.list(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].workspace, "ws-a");
    }

    /// A session written before a (simulated) process restart must still be
    /// readable afterwards — `connect` reopens the same on-disk file rather
    /// than a fresh in-memory pool.
    #[tokio::test]
    async fn session_survives_reconnecting_to_the_same_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sessions.db");
        let url = format!("sqlite://{}", db_path.display());

        let session = {
            let store = SqliteSessionStore::connect(&url).await.unwrap();
            let session = test_session("ws-restart");
            store.insert(&session).await.unwrap();
            session
        };
        // `store` (and its pool) is dropped here, standing in for the process exit.

        let reopened = SqliteSessionStore::connect(&url).await.unwrap();
        let loaded = reopened.fetch(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.workspace, "ws-restart");
    }
}
