//! Flag definitions as served by the `/flags/definitions` endpoint, and evaluation results.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied evaluation context.
///
/// Must contain the attribute named by the flag's [`context`](ExperimentationFlag::context)
/// (usually `"distinct_id"`) for the flag to be evaluated. Runtime rules are applied to the
/// `"custom_properties"` object, if present.
pub type FlagContext = HashMap<String, Value>;

/// Context key holding the subject identifier used for test users and exposure events.
pub const DISTINCT_ID: &str = "distinct_id";

/// Context key holding properties that runtime evaluation rules are applied to.
pub const CUSTOM_PROPERTIES: &str = "custom_properties";

/// Wire format of the definitions response.
#[derive(Debug, Deserialize)]
pub(crate) struct FlagsResponse {
    flags: Vec<TryParse<ExperimentationFlag>>,
}

impl FlagsResponse {
    /// Build a snapshot, skipping flags that failed to parse.
    pub(crate) fn into_definitions(self) -> FlagDefinitions {
        FlagDefinitions::from_flags(self.flags.into_iter().filter_map(|flag| match flag {
            TryParse::Parsed(flag) => Some(flag),
            TryParse::ParseFailed(raw) => {
                log::warn!(target: "mixpanel",
                           flag_key:serde = raw.get("key");
                           "skipping flag definition that failed to parse");
                None
            }
        }))
    }
}

/// `TryParse` allows a single flag to fail parsing without failing the parsing of the whole
/// response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    Parsed(T),
    ParseFailed(Value),
}

/// Immutable snapshot of all flag definitions, indexed by flag key.
///
/// Variants of every flag are sorted by key, which the weighted variant selection relies on.
#[derive(Debug, Default, Clone)]
pub struct FlagDefinitions {
    flags: HashMap<String, ExperimentationFlag>,
}

impl FlagDefinitions {
    /// Index `flags` by key, sorting each flag's variants. Later duplicates replace earlier ones.
    pub fn from_flags(flags: impl IntoIterator<Item = ExperimentationFlag>) -> FlagDefinitions {
        let flags = flags
            .into_iter()
            .map(|mut flag| {
                flag.ruleset.variants.sort_by(|a, b| a.key.cmp(&b.key));
                (flag.key.clone(), flag)
            })
            .collect();
        FlagDefinitions { flags }
    }

    /// Look up a flag by key.
    pub fn get(&self, flag_key: &str) -> Option<&ExperimentationFlag> {
        self.flags.get(flag_key)
    }

    /// Iterate over all flags in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExperimentationFlag)> {
        self.flags.iter().map(|(key, flag)| (key.as_str(), flag))
    }

    /// Number of flags in the snapshot.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// `true` if the snapshot holds no flags.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// A feature flag or experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentationFlag {
    /// Server-side identifier.
    #[serde(default)]
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Key used to look the flag up.
    pub key: String,
    /// Lifecycle status as reported by the server, e.g. `"active"`.
    #[serde(default)]
    pub status: String,
    /// Project the flag belongs to.
    #[serde(default)]
    pub project_id: i64,
    /// Variants, rollouts and test users.
    pub ruleset: RuleSet,
    /// Name of the context attribute used as the bucketing subject, e.g. `"distinct_id"`.
    pub context: String,
    /// Experiment the flag is part of, reported with exposure events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    /// Whether that experiment is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_experiment_active: Option<bool>,
    /// Mixed into bucketing salts when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_salt: Option<String>,
}

/// Assignment rules of a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Possible outcomes. Sorted by key once definitions are loaded.
    #[serde(default)]
    pub variants: Vec<Variant>,
    /// Evaluated in order; the first matching rollout wins.
    #[serde(default)]
    pub rollout: Vec<Rollout>,
    /// Explicit assignments that bypass rollouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<FlagTestUsers>,
}

/// A possible outcome of a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant name, matched case-insensitively by overrides.
    pub key: String,
    /// Payload returned to the caller.
    #[serde(default)]
    pub value: Value,
    /// Whether this is the control group of an experiment.
    #[serde(default)]
    pub is_control: bool,
    /// Weight in `[0, 1]`.
    #[serde(default)]
    pub split: f64,
}

/// A slice of the subject population that is assigned a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    /// Share of subjects included, in `[0, 1]`.
    pub rollout_percentage: f64,
    /// JsonLogic predicate over the context's custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_evaluation_rule: Option<Value>,
    /// Variant served to every included subject, bypassing weighted selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_override: Option<VariantOverride>,
    /// Per-rollout replacement of variant weights, by variant key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_splits: Option<HashMap<String, f64>>,
}

/// Reference to a variant by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOverride {
    /// Key of the referenced variant.
    pub key: String,
}

/// Explicit variant assignments for QA testers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagTestUsers {
    /// Subject identifier to variant key.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

/// Result of evaluating a flag.
///
/// `variant_key` is `None` for fallbacks, i.e. when no decision was made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedVariant {
    /// Key of the selected variant.
    pub variant_key: Option<String>,
    /// Payload of the selected variant, or the fallback value.
    pub variant_value: Value,
    /// Experiment of the evaluated flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    /// Whether that experiment is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_experiment_active: Option<bool>,
    /// `Some(true)` when the variant came from a test user assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_qa_tester: Option<bool>,
}

impl SelectedVariant {
    /// A fallback variant carrying `value` and no variant key.
    pub fn fallback(value: impl Into<Value>) -> SelectedVariant {
        SelectedVariant {
            variant_value: value.into(),
            ..SelectedVariant::default()
        }
    }
}
