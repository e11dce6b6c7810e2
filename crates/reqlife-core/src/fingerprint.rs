// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical fingerprinting of an [`Envelope`] for idempotency comparison.

use crate::Envelope;
use sha2::{Digest, Sha256};

/// Compute a stable fingerprint of the idempotency-relevant fields of an
/// envelope: `api_version`, `type`, `type_version`, `operation`, `target`,
/// and `payload`.
///
/// `serde_json::Value::Object` is backed by a `BTreeMap` (the default
/// serde_json build has the `preserve_order` feature disabled), so
/// serializing to [`serde_json::Value`] and back to a string yields keys in
/// sorted order regardless of the original field order — two envelopes that
/// differ only in the literal byte layout of their JSON produce identical
/// fingerprints. Fields that are `None` are genuinely absent from the
/// canonical value rather than present as `null`, since [`Envelope`] skips
/// serializing them.
#[must_use]
pub fn fingerprint(envelope: &Envelope) -> String {
    let canonical = serde_json::json!({
        "api_version": envelope.api_version,
        "type": envelope.type_name,
        "type_version": envelope.type_version,
        "operation": envelope.operation,
        "target": envelope.target,
        "payload": envelope.payload,
    });
    // `to_string` on a `Value::Object` walks the BTreeMap in key order.
    let bytes = serde_json::to_vec(&canonical).expect("canonical value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Operation;

    fn envelope(payload: serde_json::Value) -> Envelope {
        Envelope {
            api_version: "1".to_string(),
            type_name: "dns.record".to_string(),
            type_version: "1".to_string(),
            operation: Operation::Apply,
            idempotency_key: "k1".to_string(),
            correlation_id: None,
            requested_by: None,
            target: None,
            payload,
            tags: None,
            created_at: None,
        }
    }

    #[test]
    fn identical_payloads_fingerprint_identically() {
        let a = envelope(serde_json::json!({"a": 1, "b": 2}));
        let b = envelope(serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_payloads_fingerprint_differently() {
        let a = envelope(serde_json::json!({"a": 1}));
        let b = envelope(serde_json::json!({"a": 2}));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn idempotency_key_does_not_affect_fingerprint() {
        let mut a = envelope(serde_json::json!({"a": 1}));
        let mut b = a.clone();
        a.idempotency_key = "k1".to_string();
        b.idempotency_key = "k2".to_string();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_deterministic_across_calls() {
        let e = envelope(serde_json::json!({"nested": {"z": 1, "a": 2}}));
        assert_eq!(fingerprint(&e), fingerprint(&e));
    }
}
