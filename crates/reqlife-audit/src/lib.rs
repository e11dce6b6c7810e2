// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The audit sink contract plus an in-memory ring buffer and a JSON-lines
//! file implementation.

mod jsonl;
mod ring;

pub use jsonl::JsonlAuditSink;
pub use ring::RingAuditSink;

use async_trait::async_trait;
use reqlife_core::{AuditEvent, ReqlifeError};

/// Records [`AuditEvent`]s for a request and, where supported, replays
/// them back.
///
/// A sink that cannot replay its history should have [`AuditSink::query`]
/// return `Ok(None)`; the daemon surfaces that as `501 Not Implemented`
/// rather than treating it as a write failure.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append `event` to the trail. Recording must never fail a request —
    /// an error here is a bug in the sink, not an expected outcome, and
    /// callers should log and proceed rather than abort on it.
    async fn record(&self, event: AuditEvent) -> Result<(), ReqlifeError>;

    /// Fetch up to `limit` events for `request_id`, oldest first.
    ///
    /// Returns `Ok(None)` if this sink does not support querying.
    async fn query(
        &self,
        request_id: &str,
        limit: usize,
    ) -> Result<Option<Vec<AuditEvent>>, ReqlifeError>;
}
