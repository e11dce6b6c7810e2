// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The request store contract, plus an in-memory and a file-backed
//! ("durable") implementation satisfying it.

mod durable;
mod memory;

pub use durable::DurableStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use reqlife_core::{ExecutionPlan, ReqlifeError, RequestRecord, RequestStatus, TaskResult};

/// A patch applied to a [`RequestRecord`] by [`RequestStore::update`].
///
/// Every field is independently optional; absent fields are left
/// unchanged. Updating `results` always rebuilds the store's external-id
/// index for this record from the full array — there is no incremental
/// per-task update.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    /// Replace the plan.
    pub plan: Option<ExecutionPlan>,
    /// Replace the full results array.
    pub results: Option<Vec<TaskResult>>,
    /// Replace the request-level status.
    pub status: Option<RequestStatus>,
}

/// The storage contract shared by every request-lifecycle component.
///
/// Implementations must serialize writes per `request_id` so that a
/// concurrent reader never observes a partially-applied patch, and must
/// keep the `(backend, external_id)` index consistent with `results` after
/// every `update`.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a brand-new record.
    ///
    /// # Errors
    ///
    /// Returns [`reqlife_core::ErrorKind::DuplicateKey`] if
    /// `envelope.idempotency_key` already maps to a live record.
    async fn create(&self, record: RequestRecord) -> Result<(), ReqlifeError>;

    /// Apply `patch` to the record at `request_id`, updating `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`reqlife_core::ErrorKind::NotFound`] if no such record
    /// exists.
    async fn update(&self, request_id: &str, patch: RecordPatch) -> Result<(), ReqlifeError>;

    /// Fetch a record by id.
    async fn get(&self, request_id: &str) -> Result<Option<RequestRecord>, ReqlifeError>;

    /// Fetch a record by its idempotency key.
    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RequestRecord>, ReqlifeError>;

    /// List up to `limit` records whose status is in `statuses`, ordered by
    /// ascending `created_at`.
    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
        limit: usize,
    ) -> Result<Vec<RequestRecord>, ReqlifeError>;

    /// Resolve a backend-assigned external id to the owning task.
    async fn find_task_by_external_id(
        &self,
        backend: &str,
        external_id: &str,
    ) -> Result<Option<(String, String)>, ReqlifeError>;
}
