// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! A lightweight, infallible in-process metrics collector backing the
//! `GET /v1/metrics` endpoint. No external sink; recording a metric can
//! never fail a request.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Monotonic counters and duration histograms for one engine instance.
#[derive(Default)]
pub struct Metrics {
    requests_admitted: AtomicU64,
    idempotent_replays: AtomicU64,
    policy_denials: AtomicU64,
    callback_updates: AtomicU64,
    poll_attempts: AtomicU64,
    tasks_by_outcome: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<&'static str, Vec<u64>>>,
}

impl Metrics {
    /// A fresh, zeroed collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful admission.
    pub fn record_admitted(&self) {
        self.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that an admission resolved to an existing record.
    pub fn record_idempotent_replay(&self) {
        self.idempotent_replays.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a policy denial.
    pub fn record_policy_denial(&self) {
        self.policy_denials.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound callback fold.
    pub fn record_callback_update(&self) {
        self.callback_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a `check_status` poll attempt.
    pub fn record_poll_attempt(&self) {
        self.poll_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one task reaching terminal status `outcome`
    /// (`"succeeded"`/`"failed"`/`"canceled"`).
    pub fn record_task_outcome(&self, outcome: &str) {
        let mut map = self.tasks_by_outcome.lock().expect("metrics lock poisoned");
        *map.entry(outcome.to_string()).or_insert(0) += 1;
    }

    /// Record a duration sample under a named histogram
    /// (`"translate"`, `"policy_eval"`, `"task_execute"`, `"request_total"`).
    pub fn record_duration(&self, histogram: &'static str, duration: Duration) {
        let mut map = self.durations.lock().expect("metrics lock poisoned");
        map.entry(histogram)
            .or_default()
            .push(duration.as_millis() as u64);
    }

    /// A point-in-time, serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tasks_by_outcome = self
            .tasks_by_outcome
            .lock()
            .expect("metrics lock poisoned")
            .clone();
        let histograms = self
            .durations
            .lock()
            .expect("metrics lock poisoned")
            .iter()
            .map(|(name, samples)| (name.to_string(), HistogramSnapshot::from_samples(samples)))
            .collect();

        MetricsSnapshot {
            counters: Counters {
                requests_admitted: self.requests_admitted.load(Ordering::Relaxed),
                idempotent_replays: self.idempotent_replays.load(Ordering::Relaxed),
                policy_denials: self.policy_denials.load(Ordering::Relaxed),
                callback_updates: self.callback_updates.load(Ordering::Relaxed),
                poll_attempts: self.poll_attempts.load(Ordering::Relaxed),
                tasks_by_outcome,
            },
            histograms,
        }
    }
}

/// Scalar counters, as of [`Metrics::snapshot`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counters {
    /// Requests successfully admitted (excludes idempotent replays).
    pub requests_admitted: u64,
    /// Admissions that resolved to a pre-existing record.
    pub idempotent_replays: u64,
    /// Admissions denied by the policy gate.
    pub policy_denials: u64,
    /// Callback-driven status folds.
    pub callback_updates: u64,
    /// `check_status` poll attempts issued by the runner.
    pub poll_attempts: u64,
    /// Completed tasks, keyed by terminal status.
    pub tasks_by_outcome: HashMap<String, u64>,
}

/// A simple count/min/max/mean summary of a duration histogram, in
/// milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramSnapshot {
    /// Number of samples recorded.
    pub count: u64,
    /// Smallest sample.
    pub min_ms: u64,
    /// Largest sample.
    pub max_ms: u64,
    /// Arithmetic mean.
    pub mean_ms: f64,
}

impl HistogramSnapshot {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let count = samples.len() as u64;
        let sum: u64 = samples.iter().sum();
        Self {
            count,
            min_ms: *samples.iter().min().unwrap(),
            max_ms: *samples.iter().max().unwrap(),
            mean_ms: sum as f64 / count as f64,
        }
    }
}

/// Full metrics snapshot, serialized verbatim by `GET /v1/metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Scalar counters.
    pub counters: Counters,
    /// Duration histograms, keyed by name.
    pub histograms: HashMap<String, HistogramSnapshot>,
}
