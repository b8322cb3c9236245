use std::time::Duration;

use serde_json::{Map, Value};

use crate::models::{FlagContext, SelectedVariant, DISTINCT_ID};

/// Name of the event recorded when a subject is exposed to a variant.
pub const EXPOSURE_EVENT_NAME: &str = "$experiment_started";

/// Receives exposure events and forwards them to analytics ingestion.
///
/// Called synchronously on the evaluating thread. Implementations that need non-blocking delivery
/// should hand the event off to a queue.
pub trait ExposureTracker {
    /// Record `event_name` for `distinct_id` with the given properties.
    fn track(&self, distinct_id: &str, event_name: &str, properties: Map<String, Value>);
}

impl<T: Fn(&str, &str, Map<String, Value>)> ExposureTracker for T {
    fn track(&self, distinct_id: &str, event_name: &str, properties: Map<String, Value>) {
        self(distinct_id, event_name, properties);
    }
}

/// Builds exposure events and hands them to the configured tracker.
pub(crate) struct ExposureReporter<'a> {
    tracker: Option<Box<dyn ExposureTracker + Send + Sync + 'a>>,
    /// `"local"` or `"remote"`, informational.
    evaluation_mode: &'static str,
}

impl<'a> ExposureReporter<'a> {
    pub(crate) fn new(
        tracker: Option<Box<dyn ExposureTracker + Send + Sync + 'a>>,
        evaluation_mode: &'static str,
    ) -> Self {
        ExposureReporter {
            tracker,
            evaluation_mode,
        }
    }

    /// Report that `variant` of `flag_key` was served. No-op if the context has no string
    /// `distinct_id` or no tracker is configured.
    pub(crate) fn report(
        &self,
        flag_key: &str,
        variant: &SelectedVariant,
        context: &FlagContext,
        latency: Option<Duration>,
    ) {
        let Some(distinct_id) = context.get(DISTINCT_ID).and_then(Value::as_str) else {
            log::debug!(target: "mixpanel", flag_key;
                        "not tracking exposure since distinct_id is missing or not a string");
            return;
        };
        let Some(tracker) = &self.tracker else {
            log::debug!(target: "mixpanel", flag_key;
                        "not tracking exposure since no exposure tracker is configured");
            return;
        };

        let properties = self.properties(flag_key, variant, latency);
        log::trace!(target: "mixpanel",
                    distinct_id,
                    properties:serde = properties;
                    "tracking exposure");
        tracker.track(distinct_id, EXPOSURE_EVENT_NAME, properties);
    }

    fn properties(
        &self,
        flag_key: &str,
        variant: &SelectedVariant,
        latency: Option<Duration>,
    ) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("Experiment name".into(), flag_key.into());
        properties.insert("Variant name".into(), variant.variant_key.clone().into());
        properties.insert("$experiment_type".into(), "feature_flag".into());
        properties.insert("Flag evaluation mode".into(), self.evaluation_mode.into());

        if let Some(experiment_id) = &variant.experiment_id {
            properties.insert("$experiment_id".into(), experiment_id.clone().into());
        }
        if let Some(is_experiment_active) = variant.is_experiment_active {
            properties.insert("$is_experiment_active".into(), is_experiment_active.into());
        }
        if let Some(is_qa_tester) = variant.is_qa_tester {
            properties.insert("$is_qa_tester".into(), is_qa_tester.into());
        }
        if let Some(latency) = latency {
            properties.insert(
                "Variant fetch latency (ms)".into(),
                (latency.as_millis() as f64).into(),
            );
        }

        properties
    }
}
