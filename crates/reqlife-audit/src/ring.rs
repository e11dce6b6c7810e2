// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process audit sink keeping a bounded ring of events per request.

use crate::AuditSink;
use async_trait::async_trait;
use reqlife_core::{AuditEvent, ReqlifeError};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Keeps up to `capacity` events per `request_id` in memory, dropping the
/// oldest once full. Queryable; does not survive a process restart.
pub struct RingAuditSink {
    capacity: usize,
    events: Mutex<HashMap<String, Vec<AuditEvent>>>,
}

impl RingAuditSink {
    /// A ring sink retaining at most `capacity` events per request.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RingAuditSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl AuditSink for RingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), ReqlifeError> {
        let mut events = self.events.lock().await;
        let ring = events.entry(event.request_id.clone()).or_default();
        ring.push(event);
        if ring.len() > self.capacity {
            let overflow = ring.len() - self.capacity;
            ring.drain(0..overflow);
        }
        Ok(())
    }

    async fn query(
        &self,
        request_id: &str,
        limit: usize,
    ) -> Result<Option<Vec<AuditEvent>>, ReqlifeError> {
        let events = self.events.lock().await;
        let Some(ring) = events.get(request_id) else {
            return Ok(Some(Vec::new()));
        };
        Ok(Some(ring.iter().take(limit).cloned().collect()))
    }
}
