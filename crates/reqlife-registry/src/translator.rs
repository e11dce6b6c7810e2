// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `Translator` extension point: payload in, execution plan out.

use async_trait::async_trait;
use reqlife_core::{ExecutionPlan, ReqlifeError};
use std::collections::HashMap;
use std::sync::Arc;

/// Context threaded through to a translator's hooks.
#[derive(Debug, Clone)]
pub struct TranslatorContext {
    /// The admitted request's id.
    pub request_id: String,
    /// The intent type this translator was registered for.
    pub type_name: String,
    /// The type version this translator was registered for.
    pub type_version: String,
}

/// Produces a backend-neutral execution plan from a validated payload.
///
/// Implementors own the shape of `payload`; the engine never inspects it.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Optional pre-flight validation, run before [`Translator::translate`].
    /// The default accepts everything.
    async fn validate(
        &self,
        _ctx: &TranslatorContext,
        _payload: &serde_json::Value,
    ) -> Result<(), ReqlifeError> {
        Ok(())
    }

    /// Produce an execution plan for `payload`.
    async fn translate(
        &self,
        ctx: &TranslatorContext,
        payload: &serde_json::Value,
    ) -> Result<ExecutionPlan, ReqlifeError>;
}

/// Key a [`TranslatorRegistry`] is indexed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TranslatorKey {
    /// Intent type name.
    pub type_name: String,
    /// Intent type schema version.
    pub type_version: String,
}

impl TranslatorKey {
    /// Build a key from borrowed parts.
    pub fn new(type_name: impl Into<String>, type_version: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            type_version: type_version.into(),
        }
    }
}

struct SharedTranslator(Arc<dyn Translator>);

#[async_trait]
impl Translator for SharedTranslator {
    async fn validate(
        &self,
        ctx: &TranslatorContext,
        payload: &serde_json::Value,
    ) -> Result<(), ReqlifeError> {
        self.0.validate(ctx, payload).await
    }

    async fn translate(
        &self,
        ctx: &TranslatorContext,
        payload: &serde_json::Value,
    ) -> Result<ExecutionPlan, ReqlifeError> {
        self.0.translate(ctx, payload).await
    }
}

/// Namespaced lookup of translators by `(type, type_version)`.
///
/// Mirrors the shape of the backend registry used elsewhere in this
/// codebase: a plain map plus last-registration-wins semantics.
#[derive(Default)]
pub struct TranslatorRegistry {
    translators: HashMap<TranslatorKey, Arc<dyn Translator>>,
}

impl TranslatorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a translator for `key`. A prior registration under the
    /// same key is replaced.
    pub fn register(&mut self, key: TranslatorKey, translator: Arc<dyn Translator>) {
        self.translators.insert(key, translator);
    }

    /// Look up a translator by reference.
    #[must_use]
    pub fn get(&self, key: &TranslatorKey) -> Option<&dyn Translator> {
        self.translators.get(key).map(|t| t.as_ref())
    }

    /// Look up a translator, cloning the `Arc`.
    #[must_use]
    pub fn get_arc(&self, key: &TranslatorKey) -> Option<Arc<dyn Translator>> {
        self.translators.get(key).cloned()
    }

    /// List registered keys, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<&TranslatorKey> {
        let mut keys: Vec<&TranslatorKey> = self.translators.keys().collect();
        keys.sort();
        keys
    }

    /// Whether `key` has a registration.
    #[must_use]
    pub fn contains(&self, key: &TranslatorKey) -> bool {
        self.translators.contains_key(key)
    }

    /// Remove and return the translator registered under `key`, if any.
    pub fn remove(&mut self, key: &TranslatorKey) -> Option<Box<dyn Translator>> {
        self.translators
            .remove(key)
            .map(|t| Box::new(SharedTranslator(t)) as Box<dyn Translator>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqlife_core::ExecutionTask;

    struct Echo;

    #[async_trait]
    impl Translator for Echo {
        async fn translate(
            &self,
            ctx: &TranslatorContext,
            _payload: &serde_json::Value,
        ) -> Result<ExecutionPlan, ReqlifeError> {
            Ok(ExecutionPlan {
                tasks: vec![ExecutionTask {
                    id: format!("{}-t1", ctx.request_id),
                    backend: "mock".to_string(),
                    action: "noop".to_string(),
                    input: serde_json::json!({}),
                    depends_on: Default::default(),
                }],
            })
        }
    }

    #[tokio::test]
    async fn registers_and_resolves() {
        let mut registry = TranslatorRegistry::new();
        let key = TranslatorKey::new("dns.record", "1");
        registry.register(key.clone(), Arc::new(Echo));

        assert!(registry.contains(&key));
        let ctx = TranslatorContext {
            request_id: "r1".to_string(),
            type_name: "dns.record".to_string(),
            type_version: "1".to_string(),
        };
        let plan = registry
            .get(&key)
            .unwrap()
            .translate(&ctx, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(plan.tasks.len(), 1);
    }

    #[test]
    fn unknown_key_resolves_to_none() {
        let registry = TranslatorRegistry::new();
        assert!(registry.get(&TranslatorKey::new("x", "1")).is_none());
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = TranslatorRegistry::new();
        registry.register(TranslatorKey::new("b", "1"), Arc::new(Echo));
        registry.register(TranslatorKey::new("a", "1"), Arc::new(Echo));
        let keys = registry.list();
        assert_eq!(keys[0].type_name, "a");
        assert_eq!(keys[1].type_name, "b");
    }

    #[test]
    fn remove_returns_usable_translator() {
        let mut registry = TranslatorRegistry::new();
        let key = TranslatorKey::new("a", "1");
        registry.register(key.clone(), Arc::new(Echo));
        let removed = registry.remove(&key);
        assert!(removed.is_some());
        assert!(!registry.contains(&key));
    }
}
