// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Stable data model for the request lifecycle engine: envelopes, execution
//! plans, task results, request records, and the unified error taxonomy.
//!
//! Nothing in this crate talks to a backend, a store, or the network — it is
//! the contract every other crate in this workspace builds on.

mod envelope;
mod error;
mod fingerprint;
mod plan;
mod record;

pub use envelope::{Envelope, Operation};
pub use error::{ReqlifeError, ErrorKind};
pub use fingerprint::fingerprint;
pub use plan::{ExecutionPlan, ExecutionTask, TaskResult, TaskStatus};
pub use record::{AuditEvent, AuditLevel, AuditStage, RequestRecord, RequestStatus};

/// Version of the envelope/plan/record contract implemented by this crate.
pub const CONTRACT_VERSION: &str = "1";
