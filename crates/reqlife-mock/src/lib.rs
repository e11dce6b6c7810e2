// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! A trivial translator and a handful of adapters used across this
//! workspace's test suites and for local demos. Not part of the request
//! lifecycle contract itself.

use async_trait::async_trait;
use reqlife_core::{ExecutionPlan, ExecutionTask, ReqlifeError, TaskError, TaskResult, TaskStatus};
use reqlife_registry::{Adapter, AdapterContext, Translator, TranslatorContext};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Produces a single-task plan targeting `backend`, passing the payload
/// through as the task's `input` verbatim.
pub struct EchoTranslator {
    backend: String,
}

impl EchoTranslator {
    /// A translator that always emits one task against `backend`.
    #[must_use]
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }
}

#[async_trait]
impl Translator for EchoTranslator {
    async fn translate(
        &self,
        ctx: &TranslatorContext,
        payload: &serde_json::Value,
    ) -> Result<ExecutionPlan, ReqlifeError> {
        Ok(ExecutionPlan {
            tasks: vec![ExecutionTask {
                id: format!("{}-t1", ctx.request_id),
                backend: self.backend.clone(),
                action: "noop".to_string(),
                input: payload.clone(),
                depends_on: BTreeSet::new(),
            }],
        })
    }
}

/// Produces a two-task chain `t1 -> t2`, both against `backend`. Useful
/// for exercising dependency propagation.
pub struct ChainTranslator {
    backend: String,
}

impl ChainTranslator {
    /// A translator emitting a two-task linear chain against `backend`.
    #[must_use]
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }
}

#[async_trait]
impl Translator for ChainTranslator {
    async fn translate(
        &self,
        ctx: &TranslatorContext,
        payload: &serde_json::Value,
    ) -> Result<ExecutionPlan, ReqlifeError> {
        let first = format!("{}-t1", ctx.request_id);
        let second = format!("{}-t2", ctx.request_id);
        Ok(ExecutionPlan {
            tasks: vec![
                ExecutionTask {
                    id: first.clone(),
                    backend: self.backend.clone(),
                    action: "noop".to_string(),
                    input: payload.clone(),
                    depends_on: BTreeSet::new(),
                },
                ExecutionTask {
                    id: second,
                    backend: self.backend.clone(),
                    action: "noop".to_string(),
                    input: payload.clone(),
                    depends_on: BTreeSet::from([first]),
                },
            ],
        })
    }
}

/// An adapter that completes every task synchronously and successfully.
pub struct AlwaysSucceedsAdapter;

#[async_trait]
impl Adapter for AlwaysSucceedsAdapter {
    async fn execute(
        &self,
        task: &ExecutionTask,
        _ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError> {
        Ok(TaskResult {
            task_id: task.id.clone(),
            backend: task.backend.clone(),
            status: TaskStatus::Succeeded,
            external_id: None,
            output: Some(serde_json::json!({"echo": task.input})),
            error: None,
            started_at: None,
            finished_at: None,
        })
    }
}

/// An adapter that fails every task synchronously.
pub struct AlwaysFailsAdapter;

#[async_trait]
impl Adapter for AlwaysFailsAdapter {
    async fn execute(
        &self,
        task: &ExecutionTask,
        _ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError> {
        Ok(TaskResult {
            task_id: task.id.clone(),
            backend: task.backend.clone(),
            status: TaskStatus::Failed,
            external_id: None,
            output: None,
            error: Some(TaskError {
                message: "mock adapter always fails".to_string(),
            }),
            started_at: None,
            finished_at: None,
        })
    }
}

/// An adapter that returns `running` plus a fixed external id from
/// `execute`, and whose `check_status` reports `succeeded` once
/// [`AsyncConvergingAdapter::complete`] has been called — simulating an
/// external job that a test drives to completion via polling.
pub struct AsyncConvergingAdapter {
    external_id: String,
    ready: Arc<AtomicBool>,
}

impl AsyncConvergingAdapter {
    /// A new adapter, not yet converged.
    #[must_use]
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the backend job as complete; the next `check_status` call
    /// reports `succeeded`.
    pub fn complete(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Adapter for AsyncConvergingAdapter {
    async fn execute(
        &self,
        task: &ExecutionTask,
        _ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError> {
        Ok(TaskResult {
            task_id: task.id.clone(),
            backend: task.backend.clone(),
            status: TaskStatus::Running,
            external_id: Some(self.external_id.clone()),
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        })
    }

    async fn check_status(
        &self,
        task: &ExecutionTask,
        external_id: &str,
        _ctx: &AdapterContext,
    ) -> Result<TaskResult, ReqlifeError> {
        let status = if self.ready.load(Ordering::SeqCst) {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Running
        };
        Ok(TaskResult {
            task_id: task.id.clone(),
            backend: task.backend.clone(),
            status,
            external_id: Some(external_id.to_string()),
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        })
    }
}
