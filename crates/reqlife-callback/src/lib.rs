// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Folds inbound asynchronous backend updates into request records.
//!
//! A callback tells us that some external job, previously dispatched by
//! an adapter and left `running`, has made progress. This module never
//! talks to an adapter directly — it only trusts the body the backend
//! posted.

use async_trait::async_trait;
use chrono::Utc;
use reqlife_audit::AuditSink;
use reqlife_core::{
    AuditEvent, AuditLevel, AuditStage, ErrorKind, ReqlifeError, TaskError, TaskStatus,
};
use reqlife_store::{RecordPatch, RequestStore};
use reqlife_telemetry::Metrics;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Body accepted by `POST /v1/callbacks/{backend}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackBody {
    /// The backend-assigned id this callback updates.
    pub external_id: String,
    /// `succeeded` | `failed` | `running`; anything else (or absent)
    /// defaults to `running`.
    #[serde(default)]
    pub status: Option<String>,
    /// New output, replacing the task's prior output if present.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// New error message, replacing the task's prior error if present.
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of successfully folding a callback into a record.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    /// The request the updated task belongs to.
    pub request_id: String,
    /// The task that was updated.
    pub task_id: String,
    /// The task's status after the fold.
    pub status: TaskStatus,
}

/// Something a [`CallbackIngester`] can poke after committing an update,
/// so a runner doesn't have to wait out a full tick to notice.
#[async_trait]
pub trait Waker: Send + Sync {
    /// Nudge the implementor to do a unit of work soon. Must never
    /// return an error: a failed wake-up is not a failed callback.
    async fn wake(&self);
}

fn parse_status(raw: Option<&str>) -> TaskStatus {
    match raw {
        Some("succeeded") => TaskStatus::Succeeded,
        Some("failed") => TaskStatus::Failed,
        Some("canceled") => TaskStatus::Canceled,
        Some("running") => TaskStatus::Running,
        _ => TaskStatus::Running,
    }
}

/// Folds callback bodies into the request store on behalf of the daemon's
/// `POST /v1/callbacks/{backend}` handler.
pub struct CallbackIngester {
    store: Arc<dyn RequestStore>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
    waker: Option<Arc<dyn Waker>>,
}

impl CallbackIngester {
    /// An ingester backed by `store`/`audit`/`metrics`, optionally poking
    /// `waker` after every successfully applied callback.
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
        waker: Option<Arc<dyn Waker>>,
    ) -> Self {
        Self {
            store,
            audit,
            metrics,
            waker,
        }
    }

    /// Fold `body` from `backend` into the request/task it names.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnknownExternalId`] if `(backend, external_id)` is
    ///   not in the store's index.
    /// - [`ErrorKind::RequestGone`] if the indexed request no longer
    ///   exists.
    pub async fn ingest(
        &self,
        backend: &str,
        body: CallbackBody,
    ) -> Result<CallbackOutcome, ReqlifeError> {
        let (request_id, task_id) = self
            .store
            .find_task_by_external_id(backend, &body.external_id)
            .await?
            .ok_or_else(|| {
                ReqlifeError::new(
                    ErrorKind::UnknownExternalId,
                    format!("no task found for backend {backend} external_id {}", body.external_id),
                )
            })?;

        let mut record = self
            .store
            .get(&request_id)
            .await?
            .ok_or_else(|| {
                ReqlifeError::new(
                    ErrorKind::RequestGone,
                    format!("request {request_id} no longer exists"),
                )
            })?;

        let mut results = record.results.take().unwrap_or_default();
        let Some(result) = results.iter_mut().find(|r| r.task_id == task_id) else {
            return Err(ReqlifeError::new(
                ErrorKind::UnknownExternalId,
                format!("task {task_id} referenced by index is absent from record {request_id}"),
            ));
        };

        if result.status.is_terminal() {
            warn!(
                request_id = %request_id,
                task_id = %task_id,
                "dropping callback for already-terminal task"
            );
            let status = result.status;
            return Ok(CallbackOutcome {
                request_id,
                task_id,
                status,
            });
        }

        let new_status = parse_status(body.status.as_deref());
        result.status = new_status;
        if body.output.is_some() {
            result.output = body.output;
        }
        if let Some(message) = body.error {
            result.error = Some(TaskError { message });
        }
        if result.status.is_terminal() {
            result.finished_at.get_or_insert_with(Utc::now);
        }
        let task_status = result.status;

        let new_request_status = reqlife_core::RequestStatus::rollup(&results);

        self.store
            .update(
                &request_id,
                RecordPatch {
                    results: Some(results),
                    status: Some(new_request_status),
                    ..Default::default()
                },
            )
            .await?;

        self.metrics.record_callback_update();
        self.emit(&request_id, format!("callback folded for task {task_id}: {task_status:?}"))
            .await;

        if let Some(waker) = &self.waker {
            waker.wake().await;
        }

        Ok(CallbackOutcome {
            request_id,
            task_id,
            status: task_status,
        })
    }

    async fn emit(&self, request_id: &str, message: impl Into<String>) {
        let event = AuditEvent {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            level: AuditLevel::Info,
            stage: AuditStage::Callback,
            message: message.into(),
            data: None,
        };
        if let Err(e) = self.audit.record(event).await {
            warn!(%e, "audit sink failed to record callback event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqlife_audit::RingAuditSink;
    use reqlife_core::{Envelope, ExecutionPlan, ExecutionTask, RequestRecord, RequestStatus, TaskResult};
    use reqlife_store::MemoryStore;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope() -> Envelope {
        Envelope::validate(serde_json::json!({
            "api_version": "1",
            "type": "demo",
            "type_version": "1",
            "operation": "apply",
            "idempotency_key": "k1",
            "payload": {},
        }))
        .unwrap()
    }

    fn running_task(task_id: &str, external_id: &str) -> TaskResult {
        TaskResult {
            task_id: task_id.to_string(),
            backend: "mock".to_string(),
            status: TaskStatus::Running,
            external_id: Some(external_id.to_string()),
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    async fn seed(store: &MemoryStore, request_id: &str, task_id: &str, external_id: &str) {
        let task = ExecutionTask {
            id: task_id.to_string(),
            backend: "mock".to_string(),
            action: "noop".to_string(),
            input: serde_json::json!({}),
            depends_on: BTreeSet::new(),
        };
        let now = Utc::now();
        store
            .create(RequestRecord {
                request_id: request_id.to_string(),
                envelope: envelope(),
                plan: Some(ExecutionPlan { tasks: vec![task] }),
                results: Some(vec![running_task(task_id, external_id)]),
                status: RequestStatus::Running,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn succeeded_callback_converges_request() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "r1", "t1", "ext-1").await;
        let ingester = CallbackIngester::new(store.clone(), Arc::new(RingAuditSink::default()), Arc::new(Metrics::new()), None);

        let outcome = ingester
            .ingest(
                "mock",
                CallbackBody {
                    external_id: "ext-1".to_string(),
                    status: Some("succeeded".to_string()),
                    output: Some(serde_json::json!({"ok": true})),
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Succeeded);

        let record = store.get("r1").await.unwrap().unwrap();
        assert_eq!(record.status, RequestStatus::Executed);
    }

    #[tokio::test]
    async fn unknown_external_id_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ingester = CallbackIngester::new(store, Arc::new(RingAuditSink::default()), Arc::new(Metrics::new()), None);
        let err = ingester
            .ingest(
                "mock",
                CallbackBody {
                    external_id: "ghost".to_string(),
                    status: None,
                    output: None,
                    error: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownExternalId);
    }

    #[tokio::test]
    async fn unrecognized_status_defaults_to_running() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "r1", "t1", "ext-1").await;
        let ingester = CallbackIngester::new(store, Arc::new(RingAuditSink::default()), Arc::new(Metrics::new()), None);
        let outcome = ingester
            .ingest(
                "mock",
                CallbackBody {
                    external_id: "ext-1".to_string(),
                    status: Some("bogus".to_string()),
                    output: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn late_duplicate_callback_does_not_reopen_terminal_task() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "r1", "t1", "ext-1").await;
        let ingester = CallbackIngester::new(store.clone(), Arc::new(RingAuditSink::default()), Arc::new(Metrics::new()), None);

        ingester
            .ingest(
                "mock",
                CallbackBody {
                    external_id: "ext-1".to_string(),
                    status: Some("succeeded".to_string()),
                    output: None,
                    error: None,
                },
            )
            .await
            .unwrap();

        let outcome = ingester
            .ingest(
                "mock",
                CallbackBody {
                    external_id: "ext-1".to_string(),
                    status: Some("failed".to_string()),
                    output: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Succeeded);
    }

    struct CountingWaker(AtomicUsize);
    #[async_trait]
    impl Waker for CountingWaker {
        async fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn successful_callback_pokes_the_waker() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "r1", "t1", "ext-1").await;
        let waker = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let ingester = CallbackIngester::new(store, Arc::new(RingAuditSink::default()), Arc::new(Metrics::new()), Some(waker.clone()));
        ingester
            .ingest(
                "mock",
                CallbackBody {
                    external_id: "ext-1".to_string(),
                    status: Some("succeeded".to_string()),
                    output: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(waker.0.load(Ordering::SeqCst), 1);
    }
}
