// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pluggable source of per-backend adapter config and secrets.

use async_trait::async_trait;
use std::collections::HashMap;

/// Supplies an [`reqlife_registry::AdapterContext`]'s `config`/`secrets`
/// for a given backend. A provider failure is logged by the caller and
/// must not abort the task — the adapter is still invoked, with both
/// fields `None`.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Resolve config and secrets for `backend`.
    async fn resolve(
        &self,
        backend: &str,
    ) -> Result<(Option<serde_json::Value>, Option<serde_json::Value>), String>;
}

/// A provider that always resolves to no config and no secrets.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConfigProvider;

#[async_trait]
impl ConfigProvider for NoopConfigProvider {
    async fn resolve(
        &self,
        _backend: &str,
    ) -> Result<(Option<serde_json::Value>, Option<serde_json::Value>), String> {
        Ok((None, None))
    }
}

/// A provider backed by two flat `{backend: value}` JSON maps, loaded once
/// at startup from `config/backends.json` and `config/secrets.json`.
#[derive(Debug, Default, Clone)]
pub struct JsonConfigProvider {
    backends: HashMap<String, serde_json::Value>,
    secrets: HashMap<String, serde_json::Value>,
}

impl JsonConfigProvider {
    /// Build a provider from already-loaded config/secrets maps. Callers
    /// typically obtain these via `reqlife_config::load_optional_json`.
    #[must_use]
    pub fn new(
        backends: Option<HashMap<String, serde_json::Value>>,
        secrets: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        Self {
            backends: backends.unwrap_or_default(),
            secrets: secrets.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ConfigProvider for JsonConfigProvider {
    async fn resolve(
        &self,
        backend: &str,
    ) -> Result<(Option<serde_json::Value>, Option<serde_json::Value>), String> {
        Ok((
            self.backends.get(backend).cloned(),
            self.secrets.get(backend).cloned(),
        ))
    }
}
