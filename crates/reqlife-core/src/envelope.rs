// SPDX-License-Identifier: MIT OR Apache-2.0
//! The inbound intent envelope.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The operation a caller is requesting against `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Produce a plan without executing it.
    Plan,
    /// Produce a plan and execute it.
    Apply,
    /// Validate the payload only; no plan is produced.
    Validate,
    /// Request a rollback. Handled identically to [`Operation::Apply`] by
    /// this implementation — see the design notes for the open question
    /// this resolves.
    Rollback,
}

/// The caller-supplied intent, prior to translation.
///
/// Constructed only via [`Envelope::validate`](crate::ReqlifeError), so a
/// value of this type is always structurally valid.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    /// Envelope schema version. Currently always `"1"`.
    pub api_version: String,
    /// Intent type name, e.g. `"dns.record"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Version of `type_name`'s schema.
    pub type_version: String,
    /// What the caller wants done.
    pub operation: Operation,
    /// Caller-supplied deduplication token.
    pub idempotency_key: String,
    /// Optional caller-supplied correlation id, propagated into audit events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Optional caller identity, for audit purposes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    /// Optional target descriptor, passed through to translators verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<serde_json::Value>,
    /// Type-specific payload. Opaque to everything except the translator
    /// registered for `(type_name, type_version)`.
    pub payload: serde_json::Value,
    /// Free-form caller tags, carried through for observability only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    /// Caller-supplied creation timestamp, defaulting to admission time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Structural validation of a raw JSON document into an [`Envelope`].
    ///
    /// # Errors
    ///
    /// Returns [`ReqlifeError`](crate::ReqlifeError) with
    /// [`ErrorKind::InvalidEnvelope`](crate::ErrorKind::InvalidEnvelope) if
    /// a required field is missing, empty, or the wrong shape.
    pub fn validate(raw: serde_json::Value) -> Result<Self, crate::ReqlifeError> {
        let envelope: Envelope = serde_json::from_value(raw).map_err(|e| {
            crate::ReqlifeError::new(
                crate::ErrorKind::InvalidEnvelope,
                format!("malformed envelope: {e}"),
            )
        })?;

        if envelope.api_version != "1" {
            return Err(crate::ReqlifeError::new(
                crate::ErrorKind::InvalidEnvelope,
                format!("unsupported api_version {:?}", envelope.api_version),
            ));
        }
        if envelope.type_name.trim().is_empty() {
            return Err(crate::ReqlifeError::new(
                crate::ErrorKind::InvalidEnvelope,
                "type must not be empty",
            ));
        }
        if envelope.type_version.trim().is_empty() {
            return Err(crate::ReqlifeError::new(
                crate::ErrorKind::InvalidEnvelope,
                "type_version must not be empty",
            ));
        }
        if envelope.idempotency_key.trim().is_empty() {
            return Err(crate::ReqlifeError::new(
                crate::ErrorKind::InvalidEnvelope,
                "idempotency_key must not be empty",
            ));
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_raw() -> serde_json::Value {
        serde_json::json!({
            "api_version": "1",
            "type": "dns.record",
            "type_version": "1",
            "operation": "apply",
            "idempotency_key": "k1",
            "payload": {"name": "www"},
        })
    }

    #[test]
    fn accepts_minimal_valid_envelope() {
        let env = Envelope::validate(valid_raw()).expect("should validate");
        assert_eq!(env.type_name, "dns.record");
        assert_eq!(env.operation, Operation::Apply);
    }

    #[test]
    fn rejects_missing_idempotency_key() {
        let mut raw = valid_raw();
        raw.as_object_mut().unwrap().remove("idempotency_key");
        let err = Envelope::validate(raw).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidEnvelope);
    }

    #[test]
    fn rejects_empty_type() {
        let mut raw = valid_raw();
        raw["type"] = serde_json::json!("");
        let err = Envelope::validate(raw).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidEnvelope);
    }

    #[test]
    fn rejects_unknown_api_version() {
        let mut raw = valid_raw();
        raw["api_version"] = serde_json::json!("2");
        let err = Envelope::validate(raw).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidEnvelope);
    }

    #[test]
    fn rollback_round_trips_through_serde() {
        let mut raw = valid_raw();
        raw["operation"] = serde_json::json!("rollback");
        let env = Envelope::validate(raw).unwrap();
        assert_eq!(env.operation, Operation::Rollback);
    }
}
