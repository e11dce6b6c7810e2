// SPDX-License-Identifier: MIT OR Apache-2.0
//! DAG scheduling and dispatch: the heart of the engine.

use crate::ConfigProvider;
use chrono::Utc;
use reqlife_audit::AuditSink;
use reqlife_core::{
    AuditEvent, AuditLevel, AuditStage, ErrorKind, ExecutionPlan, ExecutionTask, ReqlifeError,
    RequestStatus, TaskError, TaskResult, TaskStatus,
};
use reqlife_registry::{AdapterContext, AdapterRegistry};
use reqlife_telemetry::Metrics;
use std::collections::BTreeMap;
use tracing::{info, warn};

async fn audit(sink: &dyn AuditSink, request_id: &str, level: AuditLevel, stage: AuditStage, message: impl Into<String>) {
    let event = AuditEvent {
        request_id: request_id.to_string(),
        timestamp: Utc::now(),
        level,
        stage,
        message: message.into(),
        data: None,
    };
    if let Err(e) = sink.record(event).await {
        warn!(%e, "audit sink failed to record event");
    }
}

fn is_dependency_blocked(task: &ExecutionTask, results: &BTreeMap<String, TaskResult>) -> bool {
    task.depends_on.iter().any(|dep| {
        results
            .get(dep)
            .map(|r| matches!(r.status, TaskStatus::Failed | TaskStatus::Canceled))
            .unwrap_or(false)
    })
}

fn is_runnable(task: &ExecutionTask, results: &BTreeMap<String, TaskResult>) -> bool {
    let Some(result) = results.get(&task.id) else {
        return false;
    };
    if result.status != TaskStatus::Queued || result.started_at.is_some() {
        return false;
    }
    task.depends_on.iter().all(|dep| {
        results
            .get(dep)
            .map(|r| r.status == TaskStatus::Succeeded)
            .unwrap_or(false)
    })
}

fn sweep_cancellations(
    order: &[String],
    tasks: &BTreeMap<String, &ExecutionTask>,
    results: &mut BTreeMap<String, TaskResult>,
) -> bool {
    let mut changed = false;
    for id in order {
        let Some(task) = tasks.get(id) else { continue };
        let result = results.get(id).expect("seeded for every task");
        if result.status == TaskStatus::Queued
            && result.started_at.is_none()
            && is_dependency_blocked(task, results)
        {
            let blocking = task
                .depends_on
                .iter()
                .find(|dep| {
                    results
                        .get(*dep)
                        .map(|r| matches!(r.status, TaskStatus::Failed | TaskStatus::Canceled))
                        .unwrap_or(false)
                })
                .cloned()
                .unwrap_or_default();
            let now = Utc::now();
            let entry = results.get_mut(id).unwrap();
            entry.status = TaskStatus::Canceled;
            entry.error = Some(TaskError {
                message: format!("canceled due to failed dependency {blocking}"),
            });
            entry.finished_at = Some(now);
            changed = true;
        }
    }
    changed
}

/// Execute (or resume executing) `plan` for `request_id`.
///
/// `existing_results`, when present, seeds the per-task state — this is
/// how the runner resumes a plan across ticks. Entries whose `task_id` has
/// no counterpart in `plan` are dropped with a warn-level audit event.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidPlan`] if the plan's dependency graph has an
/// unknown reference or a cycle.
pub async fn execute_plan(
    request_id: &str,
    plan: &ExecutionPlan,
    existing_results: Option<Vec<TaskResult>>,
    adapters: &AdapterRegistry,
    config_provider: &dyn ConfigProvider,
    audit_sink: &dyn AuditSink,
    metrics: &Metrics,
) -> Result<(Vec<TaskResult>, RequestStatus), ReqlifeError> {
    let order = plan.topological_order().map_err(|reason| {
        ReqlifeError::new(ErrorKind::InvalidPlan, reason).with_context("request_id", request_id)
    })?;

    let tasks: BTreeMap<String, &ExecutionTask> =
        plan.tasks.iter().map(|t| (t.id.clone(), t)).collect();

    let mut results: BTreeMap<String, TaskResult> = BTreeMap::new();
    if let Some(existing) = existing_results {
        for result in existing {
            if tasks.contains_key(&result.task_id) {
                results.insert(result.task_id.clone(), result);
            } else {
                audit(
                    audit_sink,
                    request_id,
                    AuditLevel::Warn,
                    AuditStage::Execute,
                    format!("dropping stale result for unknown task {}", result.task_id),
                )
                .await;
            }
        }
    }
    for task in &plan.tasks {
        results
            .entry(task.id.clone())
            .or_insert_with(|| TaskResult::queued(task));
    }

    sweep_cancellations(&order, &tasks, &mut results);

    loop {
        let runnable: Vec<String> = order
            .iter()
            .filter(|id| {
                tasks
                    .get(*id)
                    .map(|t| is_runnable(t, &results))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if runnable.is_empty() {
            break;
        }

        let mut failed_mid_wave = false;
        for id in runnable {
            let task = tasks[&id];

            let Some(adapter) = adapters.get(&task.backend) else {
                let now = Utc::now();
                let entry = results.get_mut(&id).unwrap();
                entry.status = TaskStatus::Failed;
                entry.started_at = Some(now);
                entry.finished_at = Some(now);
                entry.error = Some(TaskError {
                    message: format!("no adapter registered for backend {}", task.backend),
                });
                metrics.record_task_outcome("failed");
                audit(
                    audit_sink,
                    request_id,
                    AuditLevel::Error,
                    AuditStage::Execute,
                    format!("task {id} has no adapter for backend {}", task.backend),
                )
                .await;
                if RequestStatus::rollup(&results.values().cloned().collect::<Vec<_>>())
                    == RequestStatus::Failed
                {
                    failed_mid_wave = true;
                    break;
                }
                continue;
            };

            let (config, secrets) = match config_provider.resolve(&task.backend).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(backend = %task.backend, error = %e, "config provider failed, invoking adapter with minimal context");
                    (None, None)
                }
            };
            let ctx = AdapterContext {
                request_id: request_id.to_string(),
                config,
                secrets,
            };

            audit(
                audit_sink,
                request_id,
                AuditLevel::Info,
                AuditStage::Execute,
                format!("dispatching task {id} to backend {}", task.backend),
            )
            .await;

            let started_at = Utc::now();
            let outcome = adapter.execute(task, &ctx).await;

            let mut result = match outcome {
                Ok(result) => result,
                Err(e) => TaskResult {
                    task_id: id.clone(),
                    backend: task.backend.clone(),
                    status: TaskStatus::Failed,
                    external_id: None,
                    output: None,
                    error: Some(TaskError {
                        message: e.message().to_string(),
                    }),
                    started_at: None,
                    finished_at: None,
                },
            };
            result.task_id = id.clone();
            result.backend = task.backend.clone();
            result.started_at.get_or_insert(started_at);
            if result.status.is_terminal() {
                result.finished_at.get_or_insert_with(Utc::now);
                metrics.record_task_outcome(match result.status {
                    TaskStatus::Succeeded => "succeeded",
                    TaskStatus::Failed => "failed",
                    TaskStatus::Canceled => "canceled",
                    _ => unreachable!(),
                });
            }

            info!(task_id = %id, status = ?result.status, "task execution completed");
            audit(
                audit_sink,
                request_id,
                AuditLevel::Info,
                AuditStage::Execute,
                format!("task {id} reached status {:?}", result.status),
            )
            .await;

            results.insert(id, result);

            if RequestStatus::rollup(&results.values().cloned().collect::<Vec<_>>())
                == RequestStatus::Failed
            {
                failed_mid_wave = true;
                break;
            }
        }

        sweep_cancellations(&order, &tasks, &mut results);

        if failed_mid_wave {
            break;
        }
    }

    let ordered_results: Vec<TaskResult> = order
        .iter()
        .filter_map(|id| results.get(id).cloned())
        .collect();
    let status = RequestStatus::rollup(&ordered_results);
    Ok((ordered_results, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqlife_audit::RingAuditSink;
    use reqlife_core::{ErrorKind as EK, ExecutionTask};
    use reqlife_registry::Adapter;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    struct Succeeds;
    #[async_trait]
    impl Adapter for Succeeds {
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
                output: None,
                error: None,
                started_at: None,
                finished_at: None,
            })
        }
    }

    struct Fails;
    #[async_trait]
    impl Adapter for Fails {
        async fn execute(
            &self,
            task: &ExecutionTask,
            _ctx: &AdapterContext,
        ) -> Result<TaskResult, ReqlifeError> {
            Err(ReqlifeError::new(EK::AdapterError, "boom"))
        }
    }

    struct ReturnsRunning;
    #[async_trait]
    impl Adapter for ReturnsRunning {
        async fn execute(
            &self,
            task: &ExecutionTask,
            _ctx: &AdapterContext,
        ) -> Result<TaskResult, ReqlifeError> {
            Ok(TaskResult {
                task_id: task.id.clone(),
                backend: task.backend.clone(),
                status: TaskStatus::Running,
                external_id: Some("ext-1".to_string()),
                output: None,
                error: None,
                started_at: None,
                finished_at: None,
            })
        }
    }

    fn task(id: &str, backend: &str, deps: &[&str]) -> ExecutionTask {
        ExecutionTask {
            id: id.to_string(),
            backend: backend.to_string(),
            action: "noop".to_string(),
            input: serde_json::json!({}),
            depends_on: deps.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[tokio::test]
    async fn single_sync_task_succeeds() {
        let mut adapters = AdapterRegistry::new();
        adapters.register("a", Arc::new(Succeeds));
        let plan = ExecutionPlan {
            tasks: vec![task("t1", "a", &[])],
        };
        let audit_sink = RingAuditSink::default();
        let metrics = Metrics::new();
        let (results, status) = execute_plan(
            "r1",
            &plan,
            None,
            &adapters,
            &crate::NoopConfigProvider,
            &audit_sink,
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(status, RequestStatus::Executed);
        assert_eq!(results[0].status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn failure_cancels_downstream() {
        let mut adapters = AdapterRegistry::new();
        adapters.register("a", Arc::new(Fails));
        adapters.register("b", Arc::new(Succeeds));
        let plan = ExecutionPlan {
            tasks: vec![task("a1", "a", &[]), task("b1", "b", &["a1"])],
        };
        let audit_sink = RingAuditSink::default();
        let metrics = Metrics::new();
        let (results, status) = execute_plan(
            "r1",
            &plan,
            None,
            &adapters,
            &crate::NoopConfigProvider,
            &audit_sink,
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(status, RequestStatus::Failed);
        let b = results.iter().find(|r| r.task_id == "b1").unwrap();
        assert_eq!(b.status, TaskStatus::Canceled);
    }

    #[tokio::test]
    async fn async_task_stays_running_until_converged() {
        let mut adapters = AdapterRegistry::new();
        adapters.register("a", Arc::new(ReturnsRunning));
        adapters.register("b", Arc::new(Succeeds));
        let plan = ExecutionPlan {
            tasks: vec![task("a1", "a", &[]), task("b1", "b", &["a1"])],
        };
        let audit_sink = RingAuditSink::default();
        let metrics = Metrics::new();
        let (results, status) = execute_plan(
            "r1",
            &plan,
            None,
            &adapters,
            &crate::NoopConfigProvider,
            &audit_sink,
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(status, RequestStatus::Running);
        let a = results.iter().find(|r| r.task_id == "a1").unwrap();
        assert_eq!(a.status, TaskStatus::Running);
        let b = results.iter().find(|r| r.task_id == "b1").unwrap();
        assert_eq!(b.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn resuming_with_succeeded_dependency_unblocks_next_task() {
        let mut adapters = AdapterRegistry::new();
        adapters.register("a", Arc::new(Succeeds));
        adapters.register("b", Arc::new(Succeeds));
        let plan = ExecutionPlan {
            tasks: vec![task("a1", "a", &[]), task("b1", "b", &["a1"])],
        };
        let mut seeded = TaskResult::queued(&plan.tasks[0]);
        seeded.status = TaskStatus::Succeeded;
        seeded.started_at = Some(Utc::now());
        seeded.finished_at = Some(Utc::now());
        let existing = vec![seeded, TaskResult::queued(&plan.tasks[1])];

        let audit_sink = RingAuditSink::default();
        let metrics = Metrics::new();
        let (results, status) = execute_plan(
            "r1",
            &plan,
            Some(existing),
            &adapters,
            &crate::NoopConfigProvider,
            &audit_sink,
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(status, RequestStatus::Executed);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn unknown_adapter_fails_the_task() {
        let adapters = AdapterRegistry::new();
        let plan = ExecutionPlan {
            tasks: vec![task("t1", "ghost", &[])],
        };
        let audit_sink = RingAuditSink::default();
        let metrics = Metrics::new();
        let (results, status) = execute_plan(
            "r1",
            &plan,
            None,
            &adapters,
            &crate::NoopConfigProvider,
            &audit_sink,
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(status, RequestStatus::Failed);
        assert_eq!(results[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn stale_result_for_removed_task_is_dropped() {
        let mut adapters = AdapterRegistry::new();
        adapters.register("a", Arc::new(Succeeds));
        let plan = ExecutionPlan {
            tasks: vec![task("t1", "a", &[])],
        };
        let stale = TaskResult {
            task_id: "ghost".to_string(),
            backend: "a".to_string(),
            status: TaskStatus::Running,
            external_id: None,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        };
        let audit_sink = RingAuditSink::default();
        let metrics = Metrics::new();
        let (results, status) = execute_plan(
            "r1",
            &plan,
            Some(vec![stale]),
            &adapters,
            &crate::NoopConfigProvider,
            &audit_sink,
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(status, RequestStatus::Executed);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn cyclic_plan_is_rejected() {
        let adapters = AdapterRegistry::new();
        let plan = ExecutionPlan {
            tasks: vec![task("a", "x", &["b"]), task("b", "x", &["a"])],
        };
        let audit_sink = RingAuditSink::default();
        let metrics = Metrics::new();
        let err = execute_plan(
            "r1",
            &plan,
            None,
            &adapters,
            &crate::NoopConfigProvider,
            &audit_sink,
            &metrics,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), EK::InvalidPlan);
    }
}
