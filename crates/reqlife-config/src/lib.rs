// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Environment and config-file loading for the daemon binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure loading or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file's content did not parse as JSON.
    #[error("failed to parse {path}: {reason}")]
    ParseError {
        /// The file that failed to parse.
        path: PathBuf,
        /// The underlying serde error, as text.
        reason: String,
    },
    /// An environment variable had a value outside its allowed set.
    #[error("invalid value for {var}: {value}")]
    InvalidEnvValue {
        /// The environment variable name.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}

/// A non-fatal configuration anomaly, surfaced in logs but never blocking
/// startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A config file was not found; the documented default was used.
    MissingOptionalFile(PathBuf),
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOptionalFile(path) => {
                write!(f, "config file {} not found, using defaults", path.display())
            }
        }
    }
}

/// Which [`reqlife_store`]-shaped backend the daemon should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-memory, non-durable.
    Memory,
    /// File-per-record, durable across restarts.
    Durable,
}

/// Policy evaluation posture; mirrors
/// `reqlife_policy::PolicyMode` so the config layer does not need to
/// depend on the policy crate just to parse this one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyModeConfig {
    /// Deny-effect violations block execution.
    Enforce,
    /// Deny-effect violations are downgraded to warnings.
    Warn,
    /// No rules run.
    Disabled,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqlifeConfig {
    /// TCP port the HTTP server binds.
    pub port: u16,
    /// Which store backend to construct.
    pub store: StoreKind,
    /// Directory for the durable store, when `store == Durable`.
    pub db_path: PathBuf,
    /// Optional bearer/`x-api-key` value required on every request except
    /// `/healthz` and `/v1/metrics`.
    pub api_key: Option<String>,
    /// Policy evaluation posture.
    pub policy_mode: PolicyModeConfig,
}

impl Default for ReqlifeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            store: StoreKind::Memory,
            db_path: PathBuf::from("./data/requests"),
            api_key: None,
            policy_mode: PolicyModeConfig::Enforce,
        }
    }
}

impl ReqlifeConfig {
    /// Resolve configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvValue`] if `STORE` or `POLICY_MODE`
    /// is set to an unrecognized value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse() {
                config.port = parsed;
            }
        }
        if let Ok(store) = std::env::var("STORE") {
            config.store = match store.as_str() {
                "memory" => StoreKind::Memory,
                "durable" => StoreKind::Durable,
                other => {
                    return Err(ConfigError::InvalidEnvValue {
                        var: "STORE",
                        value: other.to_string(),
                    })
                }
            };
        }
        if let Ok(db_path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(db_path);
        }
        if let Ok(api_key) = std::env::var("API_KEY") {
            config.api_key = Some(api_key);
        }
        if let Ok(policy_mode) = std::env::var("POLICY_MODE") {
            config.policy_mode = match policy_mode.as_str() {
                "enforce" => PolicyModeConfig::Enforce,
                "warn" => PolicyModeConfig::Warn,
                "disabled" => PolicyModeConfig::Disabled,
                other => {
                    return Err(ConfigError::InvalidEnvValue {
                        var: "POLICY_MODE",
                        value: other.to_string(),
                    })
                }
            };
        }

        Ok(config)
    }
}

/// Load a JSON config file, returning `None` (plus a warning) if it is
/// absent rather than failing startup.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if the file exists but is not valid
/// JSON for `T`.
pub async fn load_optional_json<T: for<'de> Deserialize<'de>>(
    path: impl AsRef<Path>,
) -> Result<(Option<T>, Option<ConfigWarning>), ConfigError> {
    let path = path.as_ref();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Ok((
                None,
                Some(ConfigWarning::MissingOptionalFile(path.to_path_buf())),
            ))
        }
    };

    let value = serde_json::from_slice(&bytes).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok((Some(value), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_memory_enforce() {
        let config = ReqlifeConfig::default();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.policy_mode, PolicyModeConfig::Enforce);
        assert_eq!(config.port, 8080);
    }

    #[tokio::test]
    async fn missing_optional_file_warns_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let (value, warning): (Option<serde_json::Value>, _) =
            load_optional_json(dir.path().join("backends.json")).await.unwrap();
        assert!(value.is_none());
        assert!(warning.is_some());
    }

    #[tokio::test]
    async fn present_file_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backends.json");
        tokio::fs::write(&path, r#"{"mock": true}"#).await.unwrap();
        let (value, warning): (Option<serde_json::Value>, _) =
            load_optional_json(&path).await.unwrap();
        assert!(warning.is_none());
        assert_eq!(value.unwrap()["mock"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn malformed_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backends.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let result: Result<(Option<serde_json::Value>, _), _> = load_optional_json(&path).await;
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
