// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admission: envelope validation, idempotency gating, translation, and
//! policy evaluation, wired around a single [`crate::execute_plan`] call.

use crate::ConfigProvider;
use chrono::Utc;
use reqlife_audit::AuditSink;
use reqlife_core::{
    fingerprint, AuditEvent, AuditLevel, AuditStage, ErrorKind, Envelope, Operation,
    ReqlifeError, RequestRecord, RequestStatus, TaskResult,
};
use reqlife_policy::{Decision, PolicyContext, PolicyGate};
use reqlife_registry::{AdapterRegistry, TranslatorContext, TranslatorKey, TranslatorRegistry};
use reqlife_store::{RecordPatch, RequestStore};
use reqlife_telemetry::Metrics;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of [`Engine::admit`].
#[derive(Debug, Clone)]
pub struct AdmitOutcome {
    /// The admitted (or matched, for a replay) request id.
    pub request_id: String,
    /// Request-level status after admission.
    pub status: RequestStatus,
    /// `true` if this admission matched a prior record by idempotency key
    /// and fingerprint, rather than creating a new one.
    pub idempotent_replay: bool,
    /// Populated when `status == Denied`: the policy violations that
    /// caused the denial.
    pub violations: Vec<reqlife_policy::Violation>,
}

/// Orchestrates translate → policy → execute for admitted envelopes.
///
/// Holds every collaborator described in the component design: the
/// translator/adapter registries, the request store, the audit sink, the
/// policy gate, and the metrics collector.
pub struct Engine {
    translators: RwLock<TranslatorRegistry>,
    adapters: RwLock<AdapterRegistry>,
    store: Arc<dyn RequestStore>,
    audit: Arc<dyn AuditSink>,
    policy: PolicyGate,
    metrics: Arc<Metrics>,
    config_provider: Arc<dyn ConfigProvider>,
}

impl Engine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        store: Arc<dyn RequestStore>,
        audit: Arc<dyn AuditSink>,
        policy: PolicyGate,
        metrics: Arc<Metrics>,
        config_provider: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            translators: RwLock::new(TranslatorRegistry::new()),
            adapters: RwLock::new(AdapterRegistry::new()),
            store,
            audit,
            policy,
            metrics,
            config_provider,
        }
    }

    /// Register a translator for `(type, type_version)`.
    pub async fn register_translator(
        &self,
        key: TranslatorKey,
        translator: Arc<dyn reqlife_registry::Translator>,
    ) {
        self.translators.write().await.register(key, translator);
    }

    /// Register an adapter for `backend`.
    pub async fn register_adapter(
        &self,
        backend: impl Into<String>,
        adapter: Arc<dyn reqlife_registry::Adapter>,
    ) {
        self.adapters.write().await.register(backend, adapter);
    }

    /// The request store backing this engine, for callers that need direct
    /// read access (e.g. the daemon's `GET` handlers).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    /// The audit sink backing this engine.
    #[must_use]
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// The metrics collector backing this engine.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Resume executing `plan` for `request_id` from `existing_results`.
    ///
    /// Used by the runner to drive a queued or partially-converged request
    /// forward without going through [`Engine::admit`] again.
    pub async fn execute_resumed(
        &self,
        request_id: &str,
        plan: &reqlife_core::ExecutionPlan,
        existing_results: Option<Vec<TaskResult>>,
    ) -> Result<(Vec<TaskResult>, RequestStatus), ReqlifeError> {
        let adapters = self.adapters.read().await;
        crate::execute_plan(
            request_id,
            plan,
            existing_results,
            &adapters,
            self.config_provider.as_ref(),
            self.audit.as_ref(),
            &self.metrics,
        )
        .await
    }

    /// Poll `backend`'s adapter for the status of `external_id`.
    pub async fn check_status(
        &self,
        request_id: &str,
        backend: &str,
        task: &reqlife_core::ExecutionTask,
        external_id: &str,
    ) -> Result<TaskResult, ReqlifeError> {
        let adapters = self.adapters.read().await;
        let adapter = adapters.get(backend).ok_or_else(|| {
            ReqlifeError::new(
                ErrorKind::NoAdapter,
                format!("no adapter registered for backend {backend}"),
            )
        })?;
        let (config, secrets) = self
            .config_provider
            .resolve(backend)
            .await
            .unwrap_or((None, None));
        let ctx = reqlife_registry::AdapterContext {
            request_id: request_id.to_string(),
            config,
            secrets,
        };
        self.metrics.record_poll_attempt();
        adapter.check_status(task, external_id, &ctx).await
    }

    async fn emit(&self, request_id: &str, level: AuditLevel, stage: AuditStage, message: impl Into<String>) {
        let event = AuditEvent {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            level,
            stage,
            message: message.into(),
            data: None,
        };
        if let Err(e) = self.audit.record(event).await {
            warn!(%e, "audit sink failed to record event");
        }
    }

    /// Admit a raw envelope: validate, idempotency-gate, translate,
    /// policy-gate, and optionally execute.
    ///
    /// `execute` controls whether the plan is run inline (as for a
    /// synchronous `apply`) or left `queued`/`planned` for the runner to
    /// pick up later.
    pub async fn admit(
        &self,
        raw: serde_json::Value,
        execute: bool,
    ) -> Result<AdmitOutcome, ReqlifeError> {
        let envelope = Envelope::validate(raw)?;
        let incoming_fp = fingerprint(&envelope);

        if let Some(existing) = self.store.find_by_idempotency_key(&envelope.idempotency_key).await? {
            let existing_fp = fingerprint(&existing.envelope);
            if existing_fp == incoming_fp {
                self.metrics.record_idempotent_replay();
                return Ok(AdmitOutcome {
                    request_id: existing.request_id,
                    status: existing.status,
                    idempotent_replay: true,
                    violations: Vec::new(),
                });
            }
            return Err(ReqlifeError::new(
                ErrorKind::IdempotencyConflict,
                format!(
                    "idempotency_key {} was already used with a different request",
                    envelope.idempotency_key
                ),
            )
            .with_context("existing_request_id", existing.request_id.clone()));
        }

        let request_id = Uuid::new_v4().to_string();
        self.emit(&request_id, AuditLevel::Info, AuditStage::Receive, "envelope received").await;

        let key = TranslatorKey::new(envelope.type_name.clone(), envelope.type_version.clone());
        let translator = {
            let translators = self.translators.read().await;
            translators.get_arc(&key)
        }
        .ok_or_else(|| {
            ReqlifeError::new(
                ErrorKind::NoTranslator,
                format!(
                    "no translator registered for type {} version {}",
                    envelope.type_name, envelope.type_version
                ),
            )
        })?;

        let translator_ctx = TranslatorContext {
            request_id: request_id.clone(),
            type_name: envelope.type_name.clone(),
            type_version: envelope.type_version.clone(),
        };

        translator
            .validate(&translator_ctx, &envelope.payload)
            .await
            .map_err(|e| {
                ReqlifeError::new(ErrorKind::ValidationFailed, e.message().to_string())
                    .with_context("request_id", request_id.clone())
            })?;
        self.emit(&request_id, AuditLevel::Info, AuditStage::Validate, "payload validated").await;

        let plan = translator
            .translate(&translator_ctx, &envelope.payload)
            .await?;
        self.emit(&request_id, AuditLevel::Info, AuditStage::Translate, "plan produced").await;

        let is_read_only = envelope.operation == Operation::Plan || envelope.operation == Operation::Validate;

        let policy_ctx = PolicyContext {
            request_id: &request_id,
            envelope: &envelope,
            plan: &plan,
        };
        let outcome = self.policy.evaluate(&policy_ctx).await;
        self.emit(&request_id, AuditLevel::Info, AuditStage::Policy, format!("policy decision: {:?}", outcome.decision)).await;

        if outcome.decision == Decision::Deny {
            self.metrics.record_policy_denial();

            if is_read_only {
                let now = Utc::now();
                let record = RequestRecord {
                    request_id: request_id.clone(),
                    envelope,
                    plan: Some(plan),
                    results: None,
                    status: RequestStatus::Denied,
                    created_at: now,
                    updated_at: now,
                };
                self.store.create(record).await?;
                return Ok(AdmitOutcome {
                    request_id,
                    status: RequestStatus::Denied,
                    idempotent_replay: false,
                    violations: outcome.violations,
                });
            }

            let reason = outcome
                .deny_reason()
                .unwrap_or("denied by policy")
                .to_string();
            let results: Vec<TaskResult> = plan
                .tasks
                .iter()
                .map(|t| {
                    let mut r = TaskResult::queued(t);
                    r.status = reqlife_core::TaskStatus::Canceled;
                    r.error = Some(reqlife_core::TaskError {
                        message: reason.clone(),
                    });
                    r.finished_at = Some(Utc::now());
                    r
                })
                .collect();
            let now = Utc::now();
            let record = RequestRecord {
                request_id: request_id.clone(),
                envelope,
                plan: Some(plan),
                results: Some(results),
                status: RequestStatus::Denied,
                created_at: now,
                updated_at: now,
            };
            self.store.create(record).await?;
            return Ok(AdmitOutcome {
                request_id,
                status: RequestStatus::Denied,
                idempotent_replay: false,
                violations: outcome.violations,
            });
        }

        if is_read_only {
            self.metrics.record_admitted();
            let now = Utc::now();
            let record = RequestRecord {
                request_id: request_id.clone(),
                envelope,
                plan: Some(plan),
                results: None,
                status: RequestStatus::Planned,
                created_at: now,
                updated_at: now,
            };
            self.store.create(record).await?;
            return Ok(AdmitOutcome {
                request_id,
                status: RequestStatus::Planned,
                idempotent_replay: false,
                violations: Vec::new(),
            });
        }

        self.metrics.record_admitted();
        let now = Utc::now();
        let mut record = RequestRecord {
            request_id: request_id.clone(),
            envelope,
            plan: Some(plan.clone()),
            results: None,
            status: RequestStatus::Queued,
            created_at: now,
            updated_at: now,
        };

        if !execute {
            self.store.create(record).await?;
            return Ok(AdmitOutcome {
                request_id,
                status: RequestStatus::Queued,
                idempotent_replay: false,
                violations: Vec::new(),
            });
        }

        let adapters = self.adapters.read().await;
        let (results, status) = crate::execute_plan(
            &request_id,
            &plan,
            None,
            &adapters,
            self.config_provider.as_ref(),
            self.audit.as_ref(),
            &self.metrics,
        )
        .await?;
        drop(adapters);

        record.results = Some(results);
        record.status = status;
        self.store.create(record).await?;

        info!(request_id = %request_id, status = ?status, "request execution completed");
        Ok(AdmitOutcome {
            request_id,
            status,
            idempotent_replay: false,
            violations: Vec::new(),
        })
    }
}
