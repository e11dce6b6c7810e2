// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The background driver that admits queued requests and converges
//! running ones by polling adapters for status updates.

use async_trait::async_trait;
use chrono::Utc;
use reqlife_core::{RequestStatus, TaskResult, TaskStatus};
use reqlife_engine::Engine;
use reqlife_store::RecordPatch;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Tuning knobs for [`Runner`]. Defaults match the documented defaults.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// How often [`Runner::tick`] is invoked by [`Runner::spawn`].
    pub tick_interval: Duration,
    /// Max queued records drained per tick.
    pub drain_batch_size: usize,
    /// Max running records converged per tick.
    pub converge_batch_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            drain_batch_size: 5,
            converge_batch_size: 50,
        }
    }
}

/// Drains queued requests and converges running ones, one tick at a time.
///
/// A tick is never reentrant: if a tick is already in flight, a
/// concurrent call to [`Runner::tick`] returns immediately without doing
/// any work.
pub struct Runner {
    engine: Arc<Engine>,
    config: RunnerConfig,
    busy: AtomicBool,
}

impl Runner {
    /// A runner driving `engine` on the given tuning.
    #[must_use]
    pub fn new(engine: Arc<Engine>, config: RunnerConfig) -> Self {
        Self {
            engine,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Spawn a background task that calls [`Runner::tick`] on
    /// `config.tick_interval` until the returned handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.tick_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    /// Run one iteration: drain queued requests, then converge running
    /// ones. A no-op if a tick is already in progress.
    pub async fn tick(&self) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Err(e) = self.drain_queued().await {
            error!(%e, "runner: drain_queued failed");
        }
        if let Err(e) = self.converge_running().await {
            error!(%e, "runner: converge_running failed");
        }

        self.busy.store(false, Ordering::SeqCst);
    }

    async fn drain_queued(&self) -> Result<(), reqlife_core::ReqlifeError> {
        let store = self.engine.store();
        let queued = store
            .list_by_status(&[RequestStatus::Queued], self.config.drain_batch_size)
            .await?;

        for record in queued {
            let Some(plan) = &record.plan else {
                warn!(request_id = %record.request_id, "queued record has no plan, skipping");
                continue;
            };

            store
                .update(
                    &record.request_id,
                    RecordPatch {
                        status: Some(RequestStatus::Running),
                        ..Default::default()
                    },
                )
                .await?;

            let seeded: Vec<TaskResult> = record
                .results
                .clone()
                .unwrap_or_else(|| plan.tasks.iter().map(TaskResult::queued).collect());

            match self
                .engine
                .execute_resumed(&record.request_id, plan, Some(seeded))
                .await
            {
                Ok((results, status)) => {
                    store
                        .update(
                            &record.request_id,
                            RecordPatch {
                                results: Some(results),
                                status: Some(status),
                                ..Default::default()
                            },
                        )
                        .await?;
                    info!(request_id = %record.request_id, ?status, "runner drained queued request");
                }
                Err(e) => {
                    error!(request_id = %record.request_id, %e, "runner failed to execute plan");
                    store
                        .update(
                            &record.request_id,
                            RecordPatch {
                                status: Some(RequestStatus::Failed),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn converge_running(&self) -> Result<(), reqlife_core::ReqlifeError> {
        let store = self.engine.store();
        let running = store
            .list_by_status(&[RequestStatus::Running], self.config.converge_batch_size)
            .await?;

        for record in running {
            let (Some(plan), Some(results)) = (&record.plan, &record.results) else {
                continue;
            };

            let mut polled = results.clone();
            let mut any_polled = false;
            for result in &mut polled {
                if !matches!(result.status, TaskStatus::Running | TaskStatus::Queued) {
                    continue;
                }
                let Some(external_id) = result.external_id.clone() else {
                    continue;
                };
                let Some(task) = plan.tasks.iter().find(|t| t.id == result.task_id) else {
                    continue;
                };
                any_polled = true;
                match self
                    .engine
                    .check_status(&record.request_id, &task.backend, task, &external_id)
                    .await
                {
                    Ok(polled_result) => {
                        result.status = polled_result.status;
                        result.output = polled_result.output;
                        result.error = polled_result.error;
                        if result.status.is_terminal() {
                            result.finished_at.get_or_insert_with(Utc::now);
                        }
                    }
                    Err(e) => {
                        warn!(request_id = %record.request_id, task_id = %task.id, %e, "poll failed, will retry next tick");
                    }
                }
            }

            if !any_polled {
                continue;
            }

            let (results, status) = self
                .engine
                .execute_resumed(&record.request_id, plan, Some(polled))
                .await?;

            let changed = serde_json::to_value(&results).ok()
                != record.results.as_ref().and_then(|r| serde_json::to_value(r).ok())
                || status != record.status;

            if changed {
                store
                    .update(
                        &record.request_id,
                        RecordPatch {
                            results: Some(results),
                            status: Some(status),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl reqlife_callback::Waker for Runner {
    async fn wake(&self) {
        self.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqlife_audit::RingAuditSink;
    use reqlife_engine::NoopConfigProvider;
    use reqlife_mock::{AsyncConvergingAdapter, EchoTranslator};
    use reqlife_policy::{PolicyGate, PolicyMode};
    use reqlife_registry::TranslatorKey;
    use reqlife_store::MemoryStore;
    use reqlife_telemetry::Metrics;

    fn raw(key: &str) -> serde_json::Value {
        serde_json::json!({
            "api_version": "1",
            "type": "demo",
            "type_version": "1",
            "operation": "apply",
            "idempotency_key": key,
            "payload": {},
        })
    }

    #[tokio::test]
    async fn drains_queued_request_to_completion() {
        let engine = Arc::new(Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RingAuditSink::default()),
            PolicyGate::new(PolicyMode::Enforce),
            Arc::new(Metrics::new()),
            Arc::new(NoopConfigProvider),
        ));
        engine
            .register_translator(TranslatorKey::new("demo", "1"), Arc::new(EchoTranslator::new("mock")))
            .await;
        engine
            .register_adapter("mock", Arc::new(reqlife_mock::AlwaysSucceedsAdapter))
            .await;

        let outcome = engine.admit(raw("k1"), false).await.unwrap();
        assert_eq!(outcome.status, RequestStatus::Queued);

        let runner = Runner::new(engine.clone(), RunnerConfig::default());
        runner.tick().await;

        let record = engine.store().get(&outcome.request_id).await.unwrap().unwrap();
        assert_eq!(record.status, RequestStatus::Executed);
    }

    #[tokio::test]
    async fn converges_async_task_once_adapter_reports_done() {
        let engine = Arc::new(Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RingAuditSink::default()),
            PolicyGate::new(PolicyMode::Enforce),
            Arc::new(Metrics::new()),
            Arc::new(NoopConfigProvider),
        ));
        let adapter = Arc::new(AsyncConvergingAdapter::new("ext-1"));
        engine
            .register_translator(TranslatorKey::new("demo", "1"), Arc::new(EchoTranslator::new("mock")))
            .await;
        engine.register_adapter("mock", adapter.clone()).await;

        let outcome = engine.admit(raw("k1"), false).await.unwrap();
        let runner = Runner::new(engine.clone(), RunnerConfig::default());
        runner.tick().await;

        let record = engine.store().get(&outcome.request_id).await.unwrap().unwrap();
        assert_eq!(record.status, RequestStatus::Running);

        adapter.complete();
        runner.tick().await;

        let record = engine.store().get(&outcome.request_id).await.unwrap().unwrap();
        assert_eq!(record.status, RequestStatus::Executed);
    }

    #[tokio::test]
    async fn concurrent_ticks_do_not_reenter() {
        let engine = Arc::new(Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RingAuditSink::default()),
            PolicyGate::new(PolicyMode::Enforce),
            Arc::new(Metrics::new()),
            Arc::new(NoopConfigProvider),
        ));
        engine
            .register_translator(TranslatorKey::new("demo", "1"), Arc::new(EchoTranslator::new("mock")))
            .await;
        engine
            .register_adapter("mock", Arc::new(reqlife_mock::AlwaysSucceedsAdapter))
            .await;

        let runner = Arc::new(Runner::new(engine, RunnerConfig::default()));
        let (a, b) = tokio::join!(runner.tick(), runner.tick());
        let _ = (a, b);
    }
}
