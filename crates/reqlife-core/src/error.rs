// SPDX-License-Identifier: MIT OR Apache-2.0
//! The unified error taxonomy shared by every layer of the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable, machine-readable classification of a failure.
///
/// Every variant maps to exactly one HTTP status and audit stage; see the
/// table in the specification's error-handling design section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Envelope failed structural validation.
    InvalidEnvelope,
    /// Idempotency key reused with a different fingerprint.
    IdempotencyConflict,
    /// No translator registered for `(type, type_version)`.
    NoTranslator,
    /// Translator's `validate` hook raised an error.
    ValidationFailed,
    /// Execution plan failed topological validation (unknown dependency or
    /// a cycle).
    InvalidPlan,
    /// No adapter registered for a task's backend.
    NoAdapter,
    /// An adapter's `execute`/`check_status` call raised an error.
    AdapterError,
    /// The policy gate denied the plan.
    PolicyDenied,
    /// An inbound callback body was malformed.
    CallbackInvalid,
    /// A callback referenced an `(backend, external_id)` pair this engine
    /// has no record of.
    UnknownExternalId,
    /// A callback referenced a request that no longer exists.
    RequestGone,
    /// The request store detected a duplicate idempotency key during
    /// `create`, racing another admission.
    DuplicateKey,
    /// The request store has no record for an id that was expected.
    NotFound,
    /// An internal invariant was violated; always a bug if observed.
    Internal,
}

impl ErrorKind {
    /// Stable string form used on the wire and in logs, e.g. `"NO_ADAPTER"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidEnvelope => "INVALID_ENVELOPE",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::NoTranslator => "NO_TRANSLATOR",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidPlan => "INVALID_PLAN",
            Self::NoAdapter => "NO_ADAPTER",
            Self::AdapterError => "ADAPTER_ERROR",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::CallbackInvalid => "CALLBACK_INVALID",
            Self::UnknownExternalId => "UNKNOWN_EXTERNAL_ID",
            Self::RequestGone => "REQUEST_GONE",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    /// The HTTP status this kind maps to at the daemon boundary.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidEnvelope | Self::CallbackInvalid => 400,
            Self::NotFound | Self::UnknownExternalId | Self::RequestGone => 404,
            Self::IdempotencyConflict | Self::DuplicateKey => 409,
            Self::PolicyDenied => 403,
            Self::NoTranslator
            | Self::ValidationFailed
            | Self::InvalidPlan
            | Self::NoAdapter
            | Self::AdapterError
            | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unified error type returned by every fallible operation in this
/// workspace: a stable [`ErrorKind`], a human message, an optional source,
/// and structured context for audit/logging.
pub struct ReqlifeError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    context: BTreeMap<String, serde_json::Value>,
}

impl ReqlifeError {
    /// Construct a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a structured context entry. Silently dropped if `value`
    /// cannot be serialized, rather than failing the whole error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The structured context attached to this error.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    /// A serializable snapshot suitable for an HTTP error body or audit
    /// event payload.
    #[must_use]
    pub fn to_dto(&self) -> ReqlifeErrorDto {
        ReqlifeErrorDto {
            code: self.kind.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl fmt::Debug for ReqlifeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.kind,
            self.message,
            serde_json::to_string(&self.context).unwrap_or_default()
        )
    }
}

impl fmt::Display for ReqlifeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ReqlifeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Wire-serializable snapshot of a [`ReqlifeError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReqlifeErrorDto {
    /// Stable machine-readable code, matching [`ErrorKind::as_str`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = ReqlifeError::new(ErrorKind::NoAdapter, "missing backend foo");
        let s = format!("{err}");
        assert!(s.contains("NO_ADAPTER"));
        assert!(s.contains("missing backend foo"));
    }

    #[test]
    fn context_round_trips() {
        let err = ReqlifeError::new(ErrorKind::InvalidPlan, "cycle detected")
            .with_context("task_id", "t1");
        assert_eq!(err.context().get("task_id").unwrap(), "t1");
    }

    #[test]
    fn http_status_mapping_matches_taxonomy() {
        assert_eq!(ErrorKind::IdempotencyConflict.http_status(), 409);
        assert_eq!(ErrorKind::PolicyDenied.http_status(), 403);
        assert_eq!(ErrorKind::RequestGone.http_status(), 404);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn dto_serializes_stable_code() {
        let err = ReqlifeError::new(ErrorKind::CallbackInvalid, "missing external_id");
        let dto = err.to_dto();
        assert_eq!(dto.code, "CALLBACK_INVALID");
    }
}
