// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use reqlife_audit::RingAuditSink;
use reqlife_callback::CallbackIngester;
use reqlife_config::{load_optional_json, PolicyModeConfig, ReqlifeConfig, StoreKind};
use reqlife_daemon::{build_app, AppState};
use reqlife_engine::{Engine, JsonConfigProvider};
use reqlife_policy::{DeniedTypesRule, PolicyFileConfig, PolicyGate, PolicyMode};
use reqlife_runner::{Runner, RunnerConfig};
use reqlife_store::{DurableStore, MemoryStore, RequestStore};
use reqlife_telemetry::Metrics;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reqlife-daemon", version, about = "Intent-to-action orchestration daemon")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory holding `backends.json`, `secrets.json`, and `policy.json`.
    #[arg(long, default_value = "./config")]
    config_dir: PathBuf,

    /// Enable debug-level tracing for the engine and runner.
    #[arg(long)]
    debug: bool,
}

fn policy_mode(config: PolicyModeConfig) -> PolicyMode {
    match config {
        PolicyModeConfig::Enforce => PolicyMode::Enforce,
        PolicyModeConfig::Warn => PolicyMode::Warn,
        PolicyModeConfig::Disabled => PolicyMode::Disabled,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("reqlife=debug")
    } else {
        EnvFilter::new("reqlife=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ReqlifeConfig::from_env().context("load configuration from environment")?;

    let (backends, warning): (Option<HashMap<String, serde_json::Value>>, _) =
        load_optional_json(args.config_dir.join("backends.json")).await?;
    if let Some(w) = warning {
        warn!(%w, "backends config");
    }
    let (secrets, warning): (Option<HashMap<String, serde_json::Value>>, _) =
        load_optional_json(args.config_dir.join("secrets.json")).await?;
    if let Some(w) = warning {
        warn!(%w, "secrets config");
    }
    let (policy_file, warning): (Option<PolicyFileConfig>, _) =
        load_optional_json(args.config_dir.join("policy.json")).await?;
    if let Some(w) = warning {
        warn!(%w, "policy config");
    }

    let store: Arc<dyn RequestStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Durable => {
            tokio::fs::create_dir_all(&config.db_path)
                .await
                .with_context(|| format!("create store directory {}", config.db_path.display()))?;
            Arc::new(
                DurableStore::open(&config.db_path)
                    .await
                    .with_context(|| format!("open durable store at {}", config.db_path.display()))?,
            )
        }
    };

    let audit = Arc::new(RingAuditSink::default());
    let metrics = Arc::new(Metrics::new());

    let mut policy = PolicyGate::new(policy_mode(config.policy_mode));
    if let Some(policy_file) = policy_file {
        policy.add_rule(Box::new(DeniedTypesRule::new(policy_file)));
    }

    let config_provider = Arc::new(JsonConfigProvider::new(backends, secrets));

    let engine = Arc::new(Engine::new(store.clone(), audit.clone(), policy, metrics.clone(), config_provider));

    let runner = Arc::new(Runner::new(engine.clone(), RunnerConfig::default()));
    let callbacks = Arc::new(CallbackIngester::new(
        store,
        audit,
        metrics.clone(),
        Some(runner.clone() as Arc<dyn reqlife_callback::Waker>),
    ));

    runner.clone().spawn();

    let state = Arc::new(AppState {
        engine,
        callbacks,
        metrics,
    });

    let app = build_app(state, config.api_key.map(Arc::from));

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, store = ?config.store, "reqlife-daemon listening");

    axum::serve(listener, app).await.context("serve")
}
