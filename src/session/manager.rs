//! Durable, concurrency-safe session lifecycle: cache-plus-store reads and
//! writes, optimistic-concurrency updates, and background expiry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::recovery::NeverCancel;
use crate::error::{OrchestratorError, RecoveryManager, RecoveryPolicy, Result};

use super::{Progress, Session, SessionCache, SessionFilter, SessionStatus, SessionStore, SessionUpdate};

/// Knobs governing session lifetime and concurrency.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// How long a freshly created session lives before expiry.
    pub session_timeout: Duration,
    /// Ceiling on sessions in a non-terminal status at once. `None` disables
    /// the check.
    pub max_concurrent: Option<usize>,
    /// Interval between background `expire_sessions` sweeps.
    pub cleanup_interval: Duration,
    /// Bound on the in-memory cache.
    pub cache_capacity: usize,
    /// Backoff policy for the `Service`/`Internal` errors every durable-store
    /// call can raise.
    pub recovery_policy: RecoveryPolicy,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(24 * 3600),
            max_concurrent: None,
            cleanup_interval: Duration::from_secs(300),
            cache_capacity: 1024,
            recovery_policy: RecoveryPolicy::default(),
        }
    }
}

/// Combines a bounded cache with durable storage behind a single facade, plus
/// a background task that periodically expires stale sessions.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: SessionCache,
    config: SessionManagerConfig,
    recovery: RecoveryManager,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionManager {
    /// Spawns the background expiry task immediately. `Arc<Self>` is required
    /// because the spawned task and the caller both hold a reference.
    pub fn start(store: Arc<dyn SessionStore>, config: SessionManagerConfig) -> Arc<Self> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = SessionCache::new(config.cache_capacity);
        let recovery = RecoveryManager::new(config.recovery_policy.clone());

        let manager = Arc::new(Self {
            store,
            cache,
            config,
            recovery,
            shutdown_tx,
        });

        let worker = manager.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(worker.config.cleanup_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match worker.expire_sessions().await {
                            Ok(n) if n > 0 => info!(expired = n, "expired stale sessions"),
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "background session expiry failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("session expiry task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        manager
    }

    pub async fn create(&self, workspace: &str, module: &str, file_paths: Vec<PathBuf>) -> Result<Session> {
        if let Some(limit) = self.config.max_concurrent {
            let active = self
                .recovery
                .execute_with_recovery("session.count_active", &NeverCancel, || {
                    let store = self.store.clone();
                    async move { store.count_active().await }
                })
                .await?;
            if active as usize >= limit {
                return Err(OrchestratorError::service(format!(
                    "concurrent session limit reached ({active}/{limit})"
                )));
            }
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            workspace: workspace.to_string(),
            module: module.to_string(),
            status: SessionStatus::Pending,
            progress: Progress::new(file_paths.len()),
            file_paths,
            notes: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::from_std(self.config.session_timeout)
                .unwrap_or(chrono::Duration::hours(24)),
        };

        let op_id = format!("session.insert:{}", session.id);
        self.recovery
            .execute_with_recovery(&op_id, &NeverCancel, || {
                let store = self.store.clone();
                let session = session.clone();
                async move { store.insert(&session).await }
            })
            .await?;
        self.cache.put(session.clone()).await;
        info!(session_id = %session.id, workspace, module, "session created");
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<Session> {
        if let Some(session) = self.cache.get(id).await {
            return Ok(session);
        }

        let op_id = format!("session.fetch:{id}");
        let session = self
            .recovery
            .execute_with_recovery(&op_id, &NeverCancel, || {
                let store = self.store.clone();
                async move { store.fetch(id).await }
            })
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("session not found: {id}")))?;
        self.cache.put(session.clone()).await;
        Ok(session)
    }

    /// Reads the current session, applies `update`, and attempts a single
    /// version-fenced write. Spec §4.C assigns retry-after-re-read to the
    /// *caller*, not this manager: on a lost version race this returns
    /// `ConcurrentModification` (after invalidating the stale cache entry)
    /// rather than silently reapplying the same precomputed `update` against
    /// whatever the race's winner just committed — doing that would let a
    /// stale `Progress` snapshot overwrite a newer one while both callers
    /// observed success, which is exactly what spec §8's "exactly one
    /// succeeds" property forbids.
    pub async fn update(&self, id: Uuid, update: SessionUpdate) -> Result<Session> {
        let mut session = self.get(id).await?;
        let expected_version = session.version;

        apply_update(&mut session, update);
        session.version += 1;
        session.updated_at = Utc::now();

        let op_id = format!("session.update:{id}");
        let applied = self
            .recovery
            .execute_with_recovery(&op_id, &NeverCancel, || {
                let store = self.store.clone();
                let session = session.clone();
                async move { store.update_if_version_matches(&session, expected_version).await }
            })
            .await?;
        if !applied {
            self.cache.invalidate(id).await;
            return Err(OrchestratorError::concurrent_modification(id.to_string()));
        }

        self.cache.put(session.clone()).await;
        Ok(session)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let op_id = format!("session.delete:{id}");
        self.recovery
            .execute_with_recovery(&op_id, &NeverCancel, || {
                let store = self.store.clone();
                async move { store.delete(id).await }
            })
            .await?;
        self.cache.invalidate(id).await;
        Ok(())
    }

    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        self.recovery
            .execute_with_recovery("session.list", &NeverCancel, || {
                let store = self.store.clone();
                async move { store.list(filter).await }
            })
            .await
    }

    pub async fn expire_sessions(&self) -> Result<u64> {
        self.recovery
            .execute_with_recovery("session.expire_sessions", &NeverCancel, || {
                let store = self.store.clone();
                async move { store.expire_sessions(Utc::now()).await }
            })
            .await
    }

    /// Signals the background task to stop and waits briefly for it to clear
    /// its tick before returning.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            error!("session expiry task already gone at shutdown");
        }
        tokio::task::yield_now().await;
    }
}

fn apply_update(session: &mut Session, update: SessionUpdate) {
    match update {
        SessionUpdate::Status(status) => session.status = status,
        SessionUpdate::Progress(progress) => session.progress = progress,
        SessionUpdate::CurrentFile(file) => session.progress.current_file = file,
        SessionUpdate::Note(note) => session.notes.push(note),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SqliteSessionStore;

    async fn manager() -> Arc<SessionManager> {
        let store = Arc::new(SqliteSessionStore::in_memory().await.unwrap());
        SessionManager::start(store, SessionManagerConfig::default())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let manager = manager().await;
        let session = manager
            .create("ws-1", "mod-a", vec![PathBuf::from("a.rs")])
            .await
            .unwrap();

        let loaded = manager.get(session.id).await.unwrap();
        assert_eq!(loaded.workspace, "ws-1");
        assert_eq!(loaded.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn update_bumps_version_and_refreshes_cache() {
        let manager = manager().await;
        let session = manager.create("ws-1", "mod-a", vec![]).await.unwrap();

        let updated = manager
            .update(session.id, SessionUpdate::Status(SessionStatus::InProgress))
            .await
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.status, SessionStatus::InProgress);

        let fetched = manager.get(session.id).await.unwrap();
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn get_missing_session_is_not_found() {
        let manager = manager().await;
        let err = manager.get(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_removes_from_cache_and_store() {
        let manager = manager().await;
        let session = manager.create("ws-1", "mod-a", vec![]).await.unwrap();
        manager.delete(session.id).await.unwrap();
        assert!(manager.get(session.id).await.is_err());
    }

    #[tokio::test]
    async fn create_rejects_past_the_concurrency_ceiling() {
        let store = Arc::new(SqliteSessionStore::in_memory().await.unwrap());
        let manager = SessionManager::start(
            store,
            SessionManagerConfig {
                max_concurrent: Some(1),
                ..Default::default()
            },
        );

        manager.create("ws-1", "mod-a", vec![]).await.unwrap();
        let err = manager.create("ws-1", "mod-b", vec![]).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Service);
    }

    /// A version race lost at the store is surfaced as `ConcurrentModification`
    /// on the very first attempt — `update` must not quietly retry with the
    /// same precomputed value and mask the race as a success.
    #[tokio::test]
    async fn lost_version_race_is_surfaced_not_retried() {
        let store = Arc::new(SqliteSessionStore::in_memory().await.unwrap());
        let manager = SessionManager::start(store.clone(), SessionManagerConfig::default());
        let session = manager.create("ws-1", "mod-a", vec![]).await.unwrap();

        // A second writer advances the row to version 2 underneath the
        // manager's cache, which still thinks the session is at version 1.
        let mut external = session.clone();
        external.version = 2;
        assert!(store
            .update_if_version_matches(&external, session.version)
            .await
            .unwrap());

        let err = manager
            .update(session.id, SessionUpdate::Status(SessionStatus::InProgress))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Session);

        // The stale cache entry was invalidated, so the next read sees the
        // externally-written row rather than the manager's own lost write.
        let refreshed = manager.get(session.id).await.unwrap();
        assert_eq!(refreshed.version, 2);
        assert_eq!(refreshed.status, SessionStatus::Pending);
    }
}
