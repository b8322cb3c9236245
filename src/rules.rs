//! Runtime evaluation rules.
//!
//! Rollouts may carry a JsonLogic predicate that is applied to the `custom_properties` of the
//! flag context. The evaluator is exposed through the [`RuleEvaluator`] trait so it can be swapped
//! for a different implementation.
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::{Map, Value};

/// Error produced while applying a rule. Never surfaced to evaluation callers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The rule is malformed or could not be applied to the data.
    #[error("failed to evaluate rule: {0}")]
    Evaluation(String),
    /// The evaluator panicked while applying the rule.
    #[error("rule evaluator panicked")]
    EvaluatorPanicked,
}

/// Evaluates a predicate tree against a flat property bag.
pub trait RuleEvaluator {
    /// Return `Ok(true)` if `rule` is satisfied by `data`.
    fn evaluate(&self, rule: &Value, data: &Value) -> Result<bool, RuleError>;
}

/// [JsonLogic](https://jsonlogic.com/) evaluator backed by the `jsonlogic-rs` crate.
///
/// Only a rule that produces exactly boolean `true` is considered satisfied.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLogic;

impl RuleEvaluator for JsonLogic {
    fn evaluate(&self, rule: &Value, data: &Value) -> Result<bool, RuleError> {
        // Rules arrive over the network. A panic inside the evaluator must not unwind into flag
        // evaluation.
        let result = catch_unwind(AssertUnwindSafe(|| jsonlogic_rs::apply(rule, data)))
            .map_err(|_| RuleError::EvaluatorPanicked)?
            .map_err(|err| RuleError::Evaluation(err.to_string()))?;
        Ok(result == Value::Bool(true))
    }
}

impl<T: Fn(&Value, &Value) -> Result<bool, RuleError>> RuleEvaluator for T {
    fn evaluate(&self, rule: &Value, data: &Value) -> Result<bool, RuleError> {
        self(rule, data)
    }
}

/// Recursively lowercase every string key and string value.
///
/// Applied to the context's custom properties before rule evaluation.
pub fn lowercase_keys_and_values(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        Value::Array(items) => Value::Array(items.iter().map(lowercase_keys_and_values).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.to_lowercase(), lowercase_keys_and_values(value)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

/// Recursively lowercase string values only, leaving object keys (operations) untouched.
///
/// Applied to rules before evaluation.
pub fn lowercase_only_leaf_nodes(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        Value::Array(items) => Value::Array(items.iter().map(lowercase_only_leaf_nodes).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), lowercase_only_leaf_nodes(value)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}
