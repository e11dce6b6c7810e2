// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution plans: the backend-neutral DAG a translator produces.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One unit of work within a plan, targeted at a single backend.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionTask {
    /// Identifier unique within the plan, stable across re-derivation of
    /// the same request.
    pub id: String,
    /// The adapter backend this task executes against.
    pub backend: String,
    /// Opaque action name the adapter interprets.
    pub action: String,
    /// Opaque adapter-specific input.
    pub input: serde_json::Value,
    /// Ids of tasks that must reach `succeeded` before this one may start.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

/// A backend-neutral DAG of tasks produced by a translator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPlan {
    /// Tasks, in the order the translator produced them. Execution order is
    /// governed by [`depends_on`](ExecutionTask::depends_on), not by this
    /// sequence.
    pub tasks: Vec<ExecutionTask>,
}

impl ExecutionPlan {
    /// Topologically sort the plan's tasks.
    ///
    /// # Errors
    ///
    /// Returns an error message if a task depends on an unknown id or the
    /// dependency graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, String> {
        let ids: BTreeSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "task {} depends on unknown task {dep}",
                        task.id
                    ));
                }
            }
        }

        let mut remaining: Vec<&ExecutionTask> = self.tasks.iter().collect();
        let mut resolved: BTreeSet<String> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.tasks.len());

        while !remaining.is_empty() {
            let ready: Vec<&ExecutionTask> = remaining
                .iter()
                .filter(|t| t.depends_on.iter().all(|d| resolved.contains(d)))
                .copied()
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.iter().map(|t| t.id.as_str()).collect();
                return Err(format!("cycle detected among tasks: {}", stuck.join(", ")));
            }

            for task in &ready {
                resolved.insert(task.id.clone());
                order.push(task.id.clone());
            }
            let ready_ids: BTreeSet<&str> = ready.iter().map(|t| t.id.as_str()).collect();
            remaining.retain(|t| !ready_ids.contains(t.id.as_str()));
        }

        Ok(order)
    }
}

/// Outcome of one [`ExecutionTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be started.
    Queued,
    /// Dispatched to an adapter; may be polling for completion.
    Running,
    /// Completed successfully. Terminal.
    Succeeded,
    /// Completed with an error. Terminal.
    Failed,
    /// Never ran because a dependency failed or was canceled. Terminal.
    Canceled,
}

impl TaskStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// An error surfaced by a task, as reported by an adapter or the engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskError {
    /// Human-readable message.
    pub message: String,
}

/// The recorded outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: String,
    /// The backend the task ran against.
    pub backend: String,
    /// Current status.
    pub status: TaskStatus,
    /// Backend-assigned correlation id for async convergence, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Adapter-specific output, present once the task has made progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Error detail, present when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// When the task was first dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// A fresh, queued result for `task`.
    #[must_use]
    pub fn queued(task: &ExecutionTask) -> Self {
        Self {
            task_id: task.id.clone(),
            backend: task.backend.clone(),
            status: TaskStatus::Queued,
            external_id: None,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> ExecutionTask {
        ExecutionTask {
            id: id.to_string(),
            backend: "mock".to_string(),
            action: "noop".to_string(),
            input: serde_json::json!({}),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn linear_chain_orders_correctly() {
        let plan = ExecutionPlan {
            tasks: vec![task("c", &["b"]), task("a", &[]), task("b", &["a"])],
        };
        let order = plan.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn detects_cycle() {
        let plan = ExecutionPlan {
            tasks: vec![task("a", &["b"]), task("b", &["a"])],
        };
        assert!(plan.topological_order().is_err());
    }

    #[test]
    fn detects_unknown_dependency() {
        let plan = ExecutionPlan {
            tasks: vec![task("a", &["ghost"])],
        };
        assert!(plan.topological_order().is_err());
    }

    #[test]
    fn empty_plan_orders_to_empty() {
        let plan = ExecutionPlan::default();
        assert!(plan.topological_order().unwrap().is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
