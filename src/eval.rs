use serde_json::Value;

use crate::{
    models::{
        ExperimentationFlag, FlagContext, Rollout, SelectedVariant, CUSTOM_PROPERTIES, DISTINCT_ID,
    },
    rules::{lowercase_keys_and_values, lowercase_only_leaf_nodes, RuleEvaluator},
    sharder::Sharder,
};

impl ExperimentationFlag {
    /// Evaluate the flag for `context`.
    ///
    /// Returns `None` when no decision is made: the context lacks the subject attribute, or no
    /// rollout matched.
    pub fn eval(
        &self,
        context: &FlagContext,
        sharder: &impl Sharder,
        rules: &dyn RuleEvaluator,
    ) -> Option<SelectedVariant> {
        let subject = context
            .get(&self.context)
            .filter(|value| !value.is_null())
            .map(subject_key)?;

        if let Some(variant) = self.test_user_variant(context) {
            return Some(variant);
        }

        let rollout = self.assigned_rollout(&subject, context, sharder, rules)?;
        self.assigned_variant(&subject, rollout, sharder)
    }

    /// Variant explicitly assigned to the context's `distinct_id`, if any.
    pub(crate) fn test_user_variant(&self, context: &FlagContext) -> Option<SelectedVariant> {
        let users = &self.ruleset.test.as_ref()?.users;
        let distinct_id = context.get(DISTINCT_ID)?.as_str()?;
        let variant_key = users.get(distinct_id)?;
        self.matching_variant(variant_key, true)
    }

    /// First rollout whose bucket falls under its percentage and whose runtime rule holds.
    pub(crate) fn assigned_rollout(
        &self,
        subject: &str,
        context: &FlagContext,
        sharder: &impl Sharder,
        rules: &dyn RuleEvaluator,
    ) -> Option<&Rollout> {
        self.ruleset
            .rollout
            .iter()
            .enumerate()
            .find(|(index, rollout)| {
                let salt = match &self.hash_salt {
                    Some(hash_salt) => format!("{}{}{}", self.key, hash_salt, index),
                    None => format!("{}rollout", self.key),
                };
                sharder.bucket(subject, &salt) < rollout.rollout_percentage
                    && self.is_runtime_evaluation_satisfied(rollout, context, rules)
            })
            .map(|(_, rollout)| rollout)
    }

    /// Pick a variant within the assigned `rollout`.
    pub(crate) fn assigned_variant(
        &self,
        subject: &str,
        rollout: &Rollout,
        sharder: &impl Sharder,
    ) -> Option<SelectedVariant> {
        if let Some(variant_override) = &rollout.variant_override {
            match self.matching_variant(&variant_override.key, false) {
                Some(variant) => return Some(variant),
                None => {
                    log::debug!(target: "mixpanel",
                                flag_key:display = self.key,
                                variant_key:display = variant_override.key;
                                "variant override does not match any variant, using splits");
                }
            }
        }

        let salt = format!(
            "{}{}variant",
            self.key,
            self.hash_salt.as_deref().unwrap_or_default()
        );
        let hash = sharder.bucket(subject, &salt);

        let mut variants: Vec<_> = self
            .ruleset
            .variants
            .iter()
            .map(|variant| {
                let split = rollout
                    .variant_splits
                    .as_ref()
                    .and_then(|splits| splits.get(&variant.key))
                    .copied()
                    .unwrap_or(variant.split);
                (variant, split)
            })
            .collect();
        variants.sort_by(|(a, _), (b, _)| a.key.cmp(&b.key));

        // The last variant catches whatever hash space the splits leave uncovered.
        let mut cumulative = 0.0;
        let (selected, _) = variants
            .iter()
            .find(|(_, split)| {
                cumulative += split;
                hash < cumulative
            })
            .or(variants.last())?;

        Some(SelectedVariant {
            variant_key: Some(selected.key.clone()),
            variant_value: selected.value.clone(),
            experiment_id: self.experiment_id.clone(),
            is_experiment_active: self.is_experiment_active,
            is_qa_tester: None,
        })
    }

    /// Find a variant by case-insensitive key. The returned key keeps the definition's casing.
    pub(crate) fn matching_variant(
        &self,
        variant_key: &str,
        is_qa_tester: bool,
    ) -> Option<SelectedVariant> {
        let variant = self
            .ruleset
            .variants
            .iter()
            .find(|variant| eq_ignore_case(&variant.key, variant_key))?;

        Some(SelectedVariant {
            variant_key: Some(variant.key.clone()),
            variant_value: variant.value.clone(),
            experiment_id: self.experiment_id.clone(),
            is_experiment_active: self.is_experiment_active,
            is_qa_tester: is_qa_tester.then_some(true),
        })
    }

    /// Rules fail closed: missing custom properties or an evaluation error mean "not satisfied".
    fn is_runtime_evaluation_satisfied(
        &self,
        rollout: &Rollout,
        context: &FlagContext,
        rules: &dyn RuleEvaluator,
    ) -> bool {
        let Some(rule) = &rollout.runtime_evaluation_rule else {
            return true;
        };
        let Some(properties @ Value::Object(_)) = context.get(CUSTOM_PROPERTIES) else {
            return false;
        };

        let properties = lowercase_keys_and_values(properties);
        let rule = lowercase_only_leaf_nodes(rule);

        rules.evaluate(&rule, &properties).unwrap_or_else(|err| {
            log::warn!(target: "mixpanel",
                       flag_key:display = self.key,
                       error:display = err;
                       "error evaluating runtime rule, treating as not satisfied");
            false
        })
    }
}

/// Stringify a context value for hashing. Strings are used verbatim, floats as described in
/// [`format_float`], other values in their JSON form.
fn subject_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => n.as_f64().map_or_else(|| n.to_string(), format_float),
        other => other.to_string(),
    }
}

/// Format a float the way the other Mixpanel SDKs stringify subjects: the shortest
/// representation, integral values without a fractional part, and exponent notation for
/// magnitudes outside `[1e-4, 1e6)`. E.g. `42.0` is `"42"` and `1e6` is `"1e+06"`.
fn format_float(f: f64) -> String {
    let scientific = format!("{f:e}");
    let Some((mantissa, exponent)) = scientific
        .split_once('e')
        .and_then(|(mantissa, exponent)| Some((mantissa, exponent.parse::<i32>().ok()?)))
    else {
        return f.to_string();
    };

    if f == 0.0 || (-4..6).contains(&exponent) {
        f.to_string()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}
