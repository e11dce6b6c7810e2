// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The request-lifecycle engine: admission, translation, policy gating,
//! and DAG execution.

mod config_provider;
mod engine;
mod execute;

pub use config_provider::{ConfigProvider, JsonConfigProvider, NoopConfigProvider};
pub use engine::{AdmitOutcome, Engine};
pub use execute::execute_plan;
