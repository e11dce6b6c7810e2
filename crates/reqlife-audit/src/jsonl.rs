// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable append-only JSON-lines audit sink.

use crate::AuditSink;
use async_trait::async_trait;
use reqlife_core::{AuditEvent, ErrorKind, ReqlifeError};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends one JSON object per line to a file. Downstream log shippers can
/// tail it directly. Does not support [`AuditSink::query`] — callers
/// needing replay should pair this with [`crate::RingAuditSink`] or read
/// the file out-of-band.
pub struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    /// Append events to `path`, creating it if necessary.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), ReqlifeError> {
        let _guard = self.lock.lock().await;
        let mut line = serde_json::to_vec(&event).map_err(|e| {
            ReqlifeError::new(ErrorKind::Internal, format!("failed to serialize event: {e}"))
                .with_source(e)
        })?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                ReqlifeError::new(
                    ErrorKind::Internal,
                    format!("failed to open audit log {}: {e}", self.path.display()),
                )
                .with_source(e)
            })?;
        file.write_all(&line).await.map_err(|e| {
            ReqlifeError::new(ErrorKind::Internal, format!("failed to append audit event: {e}"))
                .with_source(e)
        })
    }

    async fn query(
        &self,
        _request_id: &str,
        _limit: usize,
    ) -> Result<Option<Vec<AuditEvent>>, ReqlifeError> {
        Ok(None)
    }
}
