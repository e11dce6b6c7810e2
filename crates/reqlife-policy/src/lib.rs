// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The policy gate evaluated between translation and execution.
//!
//! Mirrors the decision/precedence shape used elsewhere in this codebase
//! for composing independent rule outcomes: a decision is `deny` iff any
//! evaluated rule reports a `deny`-effect violation.

use async_trait::async_trait;
use reqlife_core::{Envelope, ExecutionPlan};
use serde::{Deserialize, Serialize};

/// The severity a [`PolicyRule`] attaches to a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Recorded but does not block execution.
    Warn,
    /// Blocks execution.
    Deny,
}

/// One finding reported by a [`PolicyRule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Stable id of the rule that raised this finding.
    pub id: String,
    /// Whether this finding blocks execution.
    pub effect: Effect,
    /// Human-readable explanation.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The overall outcome of a [`PolicyGate::evaluate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No blocking violation was found.
    Allow,
    /// At least one blocking violation was found.
    Deny,
}

/// The full result of a policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutcome {
    /// The composed decision.
    pub decision: Decision,
    /// Every violation raised by every rule, in rule-registration order.
    pub violations: Vec<Violation>,
}

impl PolicyOutcome {
    /// The first blocking violation's message, if denied.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&str> {
        self.violations
            .iter()
            .find(|v| v.effect == Effect::Deny)
            .map(|v| v.message.as_str())
    }
}

/// Input to a single rule evaluation.
#[derive(Debug, Clone)]
pub struct PolicyContext<'a> {
    /// The request id being evaluated.
    pub request_id: &'a str,
    /// The originating envelope.
    pub envelope: &'a Envelope,
    /// The translated plan.
    pub plan: &'a ExecutionPlan,
}

/// One independently evaluated policy rule.
#[async_trait]
pub trait PolicyRule: Send + Sync {
    /// Evaluate this rule against `ctx`, returning zero or more findings.
    /// A malformed finding is the rule's own bug, not a system error — this
    /// method cannot fail.
    async fn evaluate(&self, ctx: &PolicyContext<'_>) -> Vec<Violation>;
}

/// How the engine should treat a [`Decision::Deny`] outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyMode {
    /// Deny-effect violations block execution (the default).
    #[default]
    Enforce,
    /// Deny-effect violations are recorded but downgraded; the gate always
    /// returns [`Decision::Allow`].
    Warn,
    /// No rules run; the gate always returns [`Decision::Allow`] with no
    /// violations.
    Disabled,
}

/// Runs every registered [`PolicyRule`] and composes their findings.
#[derive(Default)]
pub struct PolicyGate {
    rules: Vec<Box<dyn PolicyRule>>,
    mode: PolicyMode,
}

impl PolicyGate {
    /// An empty gate in [`PolicyMode::Enforce`].
    #[must_use]
    pub fn new(mode: PolicyMode) -> Self {
        Self {
            rules: Vec::new(),
            mode,
        }
    }

    /// Register a rule. Rules run in registration order.
    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    /// Evaluate every registered rule against `ctx` and compose the result.
    pub async fn evaluate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        if self.mode == PolicyMode::Disabled {
            return PolicyOutcome {
                decision: Decision::Allow,
                violations: Vec::new(),
            };
        }

        let mut violations = Vec::new();
        for rule in &self.rules {
            violations.extend(rule.evaluate(ctx).await);
        }

        let has_deny = violations.iter().any(|v| v.effect == Effect::Deny);
        let decision = match self.mode {
            PolicyMode::Enforce if has_deny => Decision::Deny,
            _ => Decision::Allow,
        };

        PolicyOutcome {
            decision,
            violations,
        }
    }
}

/// Declarative shape of `config/policy.json`: a flat list of `type` names
/// this deployment refuses to admit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyFileConfig {
    /// Envelope `type` values that are always denied.
    #[serde(default)]
    pub denied_types: Vec<String>,
}

/// A rule built from [`PolicyFileConfig`]: denies any envelope whose
/// `type` appears in `denied_types`.
pub struct DeniedTypesRule {
    denied: Vec<String>,
}

impl DeniedTypesRule {
    /// A rule denying exactly the types named in `config`.
    #[must_use]
    pub fn new(config: PolicyFileConfig) -> Self {
        Self {
            denied: config.denied_types,
        }
    }
}

#[async_trait]
impl PolicyRule for DeniedTypesRule {
    async fn evaluate(&self, ctx: &PolicyContext<'_>) -> Vec<Violation> {
        if self.denied.iter().any(|t| t == &ctx.envelope.type_name) {
            vec![Violation {
                id: "denied-type".to_string(),
                effect: Effect::Deny,
                message: format!("type {} is denied by policy configuration", ctx.envelope.type_name),
                data: None,
            }]
        } else {
            Vec::new()
        }
    }
}
