//! Name-keyed service container wiring the kernel's components together.
//!
//! Grounded on `prodigy::commands::registry::CommandRegistry`'s
//! `Arc<RwLock<HashMap<String, Arc<dyn _>>>>` shape: one reader/writer lock
//! over the whole map, since reads (resolving a dependency at call time) are
//! the hot path and registration happens once at startup.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{OrchestratorError, Result};

type AnyService = Arc<dyn Any + Send + Sync>;

/// A type-erased registry of shared services, keyed by name. Distinct from a
/// type-keyed DI container because the kernel's components (session
/// manager, workflow engine, queue registry, recovery manager) are named
/// singletons, not interchangeable implementations resolved by trait.
#[derive(Default)]
pub struct ServiceContainer {
    services: RwLock<HashMap<String, AnyService>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `service` under `name`, replacing any prior registration.
    pub async fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<T>) {
        self.services.write().await.insert(name.into(), service);
    }

    /// Resolves the service registered under `name` as `T`.
    ///
    /// Fails with `NotFound` if nothing is registered under that name, or
    /// `Internal` if something is but its concrete type doesn't match `T` —
    /// a caller-side bug (the registrar and resolver disagreed on the type),
    /// not a transient condition, so it is not retried.
    pub async fn resolve<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let services = self.services.read().await;
        let service = services
            .get(name)
            .ok_or_else(|| OrchestratorError::not_found(format!("service not registered: {name}")))?;

        if (**service).type_id() != TypeId::of::<T>() {
            return Err(OrchestratorError::internal(format!(
                "service '{name}' registered under a different type"
            )));
        }

        Ok(service
            .clone()
            .downcast::<T>()
            .expect("type_id check above guarantees this downcast succeeds"))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.services.read().await.contains_key(name)
    }

    pub async fn remove(&self, name: &str) {
        self.services.write().await.remove(name);
    }
}
