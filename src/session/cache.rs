//! Bounded in-memory cache sitting in front of the durable session store.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Session;

/// Wraps an [`LruCache`] behind an async lock. Entries are owned clones of
/// [`Session`], never aliases into the store, so a cache hit can be handed
/// back to a caller without holding any lock past the read.
pub struct SessionCache {
    inner: Arc<RwLock<LruCache<Uuid, Session>>>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Arc::new(RwLock::new(LruCache::new(capacity))),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.inner.write().await.get(&id).cloned()
    }

    pub async fn put(&self, session: Session) {
        self.inner.write().await.put(session.id, session);
    }

    pub async fn invalidate(&self, id: Uuid) {
        self.inner.write().await.pop(&id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Progress, SessionStatus};
    use chrono::Utc;
    use std::path::PathBuf;

    fn session() -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            workspace: "ws".to_string(),
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

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = SessionCache::new(4);
        let s = session();
        let id = s.id;
        cache.put(s).await;
        assert!(cache.get(id).await.is_some());
    }

    #[tokio::test]
    async fn evicts_least_recently_used_past_capacity() {
        let cache = SessionCache::new(1);
        let a = session();
        let b = session();
        let (id_a, id_b) = (a.id, b.id);

        cache.put(a).await;
        cache.put(b).await;

        assert!(cache.get(id_a).await.is_none());
        assert!(cache.get(id_b).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = SessionCache::new(4);
        let s = session();
        let id = s.id;
        cache.put(s).await;
        cache.invalidate(id).await;
        assert!(cache.get(id).await.is_none());
    }
}
