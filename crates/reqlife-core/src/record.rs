// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stored request state and the audit trail attached to it.

use crate::{Envelope, ExecutionPlan, TaskResult, TaskStatus};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Request-level status, derived from the plan's task results by roll-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Translated but not (yet) executed.
    Planned,
    /// Admitted for execution, not yet picked up by the runner.
    Queued,
    /// The runner has started executing the plan.
    Running,
    /// Every task succeeded. Terminal.
    Executed,
    /// At least one task failed or was canceled. Terminal.
    Failed,
    /// The policy gate denied the plan. Terminal.
    Denied,
}

impl RequestStatus {
    /// Terminal statuses are never left once entered.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Denied)
    }

    /// Roll up a plan's task results into a single request status.
    ///
    /// An empty plan rolls up to [`RequestStatus::Executed`].
    #[must_use]
    pub fn rollup(results: &[TaskResult]) -> Self {
        if results
            .iter()
            .any(|r| matches!(r.status, TaskStatus::Failed | TaskStatus::Canceled))
        {
            return Self::Failed;
        }
        if results
            .iter()
            .any(|r| matches!(r.status, TaskStatus::Running | TaskStatus::Queued))
        {
            return Self::Running;
        }
        Self::Executed
    }
}

/// The persisted state of one admitted request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RequestRecord {
    /// Freshly generated unique identifier for this request.
    pub request_id: String,
    /// The envelope that produced this record.
    pub envelope: Envelope,
    /// The translated plan, absent only in the moment before translation
    /// completes (never observable outside the engine).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    /// Per-task results, indexed by position against `plan.tasks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TaskResult>>,
    /// Current request-level status.
    pub status: RequestStatus,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

/// Severity of an [`AuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Informational.
    Info,
    /// Noteworthy but not an error (e.g. a dropped stale result).
    Warn,
    /// A failure worth surfacing.
    Error,
}

/// Which lifecycle stage produced an [`AuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    /// The envelope was received.
    Receive,
    /// Structural/translator validation.
    Validate,
    /// Translation into an execution plan.
    Translate,
    /// Policy evaluation.
    Policy,
    /// Plan execution (admission through task completion).
    Execute,
    /// An inbound callback was folded into the record.
    Callback,
}

/// One append-only entry in a request's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuditEvent {
    /// The request this event belongs to.
    pub request_id: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: AuditLevel,
    /// Lifecycle stage.
    pub stage: AuditStage,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
