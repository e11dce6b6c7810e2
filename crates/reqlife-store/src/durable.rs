// SPDX-License-Identifier: MIT OR Apache-2.0
//! File-per-record durable [`RequestStore`].
//!
//! Each record is persisted as `{request_id}.json` under a configured
//! directory, the same one-file-per-artifact shape this codebase already
//! uses for its receipt store; on construction the directory is scanned
//! and every record rehydrated into an in-memory index.

use crate::{MemoryStore, RecordPatch, RequestStore};
use async_trait::async_trait;
use reqlife_core::{ErrorKind, ReqlifeError, RequestRecord, RequestStatus};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A [`RequestStore`] backed by one JSON file per request under `dir`,
/// with an in-memory index rebuilt from disk at startup.
pub struct DurableStore {
    dir: PathBuf,
    memory: MemoryStore,
}

impl DurableStore {
    /// Open (creating if necessary) a durable store rooted at `dir`,
    /// hydrating its in-memory index from any `*.json` files already
    /// present.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be created or read.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ReqlifeError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ReqlifeError::new(
                ErrorKind::Internal,
                format!("failed to create store directory {}: {e}", dir.display()),
            )
            .with_source(e)
        })?;

        let store = Self {
            dir,
            memory: MemoryStore::new(),
        };
        store.hydrate().await?;
        Ok(store)
    }

    async fn hydrate(&self) -> Result<(), ReqlifeError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            ReqlifeError::new(
                ErrorKind::Internal,
                format!("failed to read store directory: {e}"),
            )
            .with_source(e)
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ReqlifeError::new(ErrorKind::Internal, format!("directory walk failed: {e}"))
                .with_source(e)
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<RequestRecord>(&bytes) {
                    Ok(record) => {
                        if let Err(e) = self.memory.create(record).await {
                            warn!(path = %path.display(), error = %e, "skipping unreadable durable record");
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to parse durable record"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read durable record"),
            }
        }
        Ok(())
    }

    fn path_for(&self, request_id: &str) -> PathBuf {
        self.dir.join(format!("{request_id}.json"))
    }

    async fn persist(&self, record: &RequestRecord) -> Result<(), ReqlifeError> {
        let path = self.path_for(&record.request_id);
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| {
            ReqlifeError::new(ErrorKind::Internal, format!("failed to serialize record: {e}"))
                .with_source(e)
        })?;
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            ReqlifeError::new(
                ErrorKind::Internal,
                format!("failed to persist record to {}: {e}", path.display()),
            )
            .with_source(e)
        })
    }

    /// The directory this store persists records under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RequestStore for DurableStore {
    async fn create(&self, record: RequestRecord) -> Result<(), ReqlifeError> {
        self.memory.create(record.clone()).await?;
        self.persist(&record).await
    }

    async fn update(&self, request_id: &str, patch: RecordPatch) -> Result<(), ReqlifeError> {
        self.memory.update(request_id, patch).await?;
        let record = self.memory.get(request_id).await?.ok_or_else(|| {
            ReqlifeError::new(ErrorKind::NotFound, format!("no request {request_id}"))
        })?;
        self.persist(&record).await
    }

    async fn get(&self, request_id: &str) -> Result<Option<RequestRecord>, ReqlifeError> {
        self.memory.get(request_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RequestRecord>, ReqlifeError> {
        self.memory.find_by_idempotency_key(key).await
    }

    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
        limit: usize,
    ) -> Result<Vec<RequestRecord>, ReqlifeError> {
        self.memory.list_by_status(statuses, limit).await
    }

    async fn find_task_by_external_id(
        &self,
        backend: &str,
        external_id: &str,
    ) -> Result<Option<(String, String)>, ReqlifeError> {
        self.memory.find_task_by_external_id(backend, external_id).await
    }
}
