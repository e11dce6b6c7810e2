// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`RequestStore`], the default and the one used in tests.

use crate::{RecordPatch, RequestStore};
use async_trait::async_trait;
use chrono::Utc;
use reqlife_core::{ErrorKind, ReqlifeError, RequestRecord, RequestStatus};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    records: HashMap<String, RequestRecord>,
    by_idempotency_key: HashMap<String, String>,
    by_external_id: HashMap<(String, String), (String, String)>,
}

impl Inner {
    fn reindex_external_ids(&mut self, record: &RequestRecord) {
        self.by_external_id
            .retain(|_, (rid, _)| rid != &record.request_id);
        if let Some(results) = &record.results {
            for result in results {
                if let Some(external_id) = &result.external_id {
                    self.by_external_id.insert(
                        (result.backend.clone(), external_id.clone()),
                        (record.request_id.clone(), result.task_id.clone()),
                    );
                }
            }
        }
    }
}

/// A mutex-guarded in-memory implementation of [`RequestStore`].
///
/// All writes are serialized through one lock; this store is intended for
/// a single engine instance, exactly as the wider specification scopes
/// this system.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn create(&self, record: RequestRecord) -> Result<(), ReqlifeError> {
        let mut inner = self.inner.lock().await;
        let key = record.envelope.idempotency_key.clone();
        if inner.by_idempotency_key.contains_key(&key) {
            return Err(ReqlifeError::new(
                ErrorKind::DuplicateKey,
                format!("idempotency_key {key} already admitted"),
            ));
        }
        inner
            .by_idempotency_key
            .insert(key, record.request_id.clone());
        inner.reindex_external_ids(&record);
        inner.records.insert(record.request_id.clone(), record);
        Ok(())
    }

    async fn update(&self, request_id: &str, patch: RecordPatch) -> Result<(), ReqlifeError> {
        let mut inner = self.inner.lock().await;
        let record = inner.records.get_mut(request_id).ok_or_else(|| {
            ReqlifeError::new(ErrorKind::NotFound, format!("no request {request_id}"))
        })?;

        if let Some(plan) = patch.plan {
            record.plan = Some(plan);
        }
        if let Some(results) = patch.results {
            record.results = Some(results);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        record.updated_at = Utc::now();

        let record = record.clone();
        inner.reindex_external_ids(&record);
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<RequestRecord>, ReqlifeError> {
        Ok(self.inner.lock().await.records.get(request_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RequestRecord>, ReqlifeError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_idempotency_key
            .get(key)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
        limit: usize,
    ) -> Result<Vec<RequestRecord>, ReqlifeError> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<RequestRecord> = inner
            .records
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        matched.truncate(limit);
        Ok(matched)
    }

    async fn find_task_by_external_id(
        &self,
        backend: &str,
        external_id: &str,
    ) -> Result<Option<(String, String)>, ReqlifeError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_external_id
            .get(&(backend.to_string(), external_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqlife_core::{Envelope, Operation, TaskResult, TaskStatus};

    fn envelope(key: &str) -> Envelope {
        Envelope {
            api_version: "1".to_string(),
            type_name: "dns.record".to_string(),
            type_version: "1".to_string(),
            operation: Operation::Apply,
            idempotency_key: key.to_string(),
            correlation_id: None,
            requested_by: None,
            target: None,
            payload: serde_json::json!({}),
            tags: None,
            created_at: None,
        }
    }

    fn record(request_id: &str, key: &str) -> RequestRecord {
        let now = Utc::now();
        RequestRecord {
            request_id: request_id.to_string(),
            envelope: envelope(key),
            plan: None,
            results: None,
            status: RequestStatus::Planned,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryStore::new();
        store.create(record("r1", "k1")).await.unwrap();
        let fetched = store.get("r1").await.unwrap().unwrap();
        assert_eq!(fetched.request_id, "r1");
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = MemoryStore::new();
        store.create(record("r1", "k1")).await.unwrap();
        let err = store.create(record("r2", "k1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
    }

    #[tokio::test]
    async fn find_by_idempotency_key_resolves() {
        let store = MemoryStore::new();
        store.create(record("r1", "k1")).await.unwrap();
        let found = store.find_by_idempotency_key("k1").await.unwrap().unwrap();
        assert_eq!(found.request_id, "r1");
    }

    #[tokio::test]
    async fn update_missing_record_errors() {
        let store = MemoryStore::new();
        let err = store
            .update("ghost", RecordPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_rebuilds_external_index() {
        let store = MemoryStore::new();
        store.create(record("r1", "k1")).await.unwrap();
        let result = TaskResult {
            task_id: "t1".to_string(),
            backend: "mock".to_string(),
            status: TaskStatus::Running,
            external_id: Some("ext-1".to_string()),
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        };
        store
            .update(
                "r1",
                RecordPatch {
                    results: Some(vec![result]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let found = store
            .find_task_by_external_id("mock", "ext-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, ("r1".to_string(), "t1".to_string()));
    }

    #[tokio::test]
    async fn list_by_status_is_sorted_by_created_at() {
        let store = MemoryStore::new();
        let mut first = record("r1", "k1");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        first.status = RequestStatus::Queued;
        let mut second = record("r2", "k2");
        second.status = RequestStatus::Queued;
        store.create(second).await.unwrap();
        store.create(first).await.unwrap();

        let listed = store
            .list_by_status(&[RequestStatus::Queued], 10)
            .await
            .unwrap();
        assert_eq!(listed[0].request_id, "r1");
        assert_eq!(listed[1].request_id, "r2");
    }

    #[tokio::test]
    async fn list_by_status_honors_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut r = record(&format!("r{i}"), &format!("k{i}"));
            r.status = RequestStatus::Queued;
            store.create(r).await.unwrap();
        }
        let listed = store
            .list_by_status(&[RequestStatus::Queued], 2)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
    }
}
