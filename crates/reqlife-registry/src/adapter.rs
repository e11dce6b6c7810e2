// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `Adapter` extension point: one task, one backend.

use async_trait::async_trait;
use reqlife_core::{ExecutionTask, ReqlifeError, TaskResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Context threaded through to an adapter's hooks.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// The request this task belongs to.
    pub request_id: String,
    /// Backend-scoped configuration, loaded by `reqlife-config`.
    pub config: Option<serde_json::Value>,
    /// Backend-scoped secrets, loaded by `reqlife-config`.
    pub secrets: Option<serde_json::Value>,
}

/// Executes one [`ExecutionTask`] against one backend.
///
/// An adapter may complete synchronously (returning a terminal status from
/// [`Adapter::execute`]) or asynchronously (returning `running` plus an
/// `external_id`, converged later via [`Adapter::check_status`] or an
/// inbound callback).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Start or synchronously complete `task`.
    async fn execute(
        &self,
        task: &ExecutionTask,
        ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError>;

    /// Poll a previously started task by its `external_id`. The default
    /// implementation reports that this adapter does not support polling;
    /// such an adapter can converge only via callback.
    async fn check_status(
        &self,
        task: &ExecutionTask,
        _external_id: &str,
        ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError> {
        let _ = ctx;
        Err(ReqlifeError::new(
            reqlife_core::ErrorKind::AdapterError,
            format!(
                "adapter {} does not support status polling",
                task.backend
            ),
        ))
    }
}

struct SharedAdapter(Arc<dyn Adapter>);

#[async_trait]
impl Adapter for SharedAdapter {
    async fn execute(
        &self,
        task: &ExecutionTask,
        ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError> {
        self.0.execute(task, ctx).await
    }

    async fn check_status(
        &self,
        task: &ExecutionTask,
        external_id: &str,
        ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError> {
        self.0.check_status(task, external_id, ctx).await
    }
}

/// Namespaced lookup of adapters by backend name.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for `backend`. A prior registration under the
    /// same name is replaced.
    pub fn register(&mut self, backend: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(backend.into(), adapter);
    }

    /// Look up an adapter by reference.
    #[must_use]
    pub fn get(&self, backend: &str) -> Option<&dyn Adapter> {
        self.adapters.get(backend).map(|a| a.as_ref())
    }

    /// Look up an adapter, cloning the `Arc`.
    #[must_use]
    pub fn get_arc(&self, backend: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(backend).cloned()
    }

    /// List registered backend names, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether `backend` has a registration.
    #[must_use]
    pub fn contains(&self, backend: &str) -> bool {
        self.adapters.contains_key(backend)
    }

    /// Remove and return the adapter registered for `backend`, if any.
    pub fn remove(&mut self, backend: &str) -> Option<Box<dyn Adapter>> {
        self.adapters
            .remove(backend)
            .map(|a| Box::new(SharedAdapter(a)) as Box<dyn Adapter>)
    }
}
