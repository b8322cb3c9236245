use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use serde_json::Value;

use crate::{
    definitions_fetcher::DefinitionsFetcher,
    definitions_store::DefinitionsStore,
    exposure::ExposureReporter,
    models::{FlagContext, SelectedVariant},
    poller::{PollerThread, PollerThreadConfig},
    rules::RuleEvaluator,
    sharder::Fnv1aSharder,
    LocalFlagsConfig, Result,
};

/// Evaluates feature flags locally against definitions fetched from Mixpanel.
///
/// In order to create a provider instance, first create [`LocalFlagsConfig`]. Evaluation never
/// performs I/O: it reads the most recently fetched definitions and falls back to the caller's
/// value whenever no decision can be made.
///
/// # Examples
/// ```no_run
/// # use serde_json::json;
/// # use mixpanel_flags::{FlagContext, LocalFlagsConfig};
/// let provider = LocalFlagsConfig::from_token("project-token").to_provider()?;
/// provider.start_polling_for_definitions()?;
///
/// let context: FlagContext = [("distinct_id".to_owned(), json!("user-1"))].into();
/// if provider.is_enabled("new-checkout", &context) {
///     // ...
/// }
/// # Ok::<(), mixpanel_flags::Error>(())
/// ```
pub struct LocalFlagsProvider<'a> {
    store: Arc<DefinitionsStore>,
    fetcher: Arc<DefinitionsFetcher>,
    /// `None` when background polling is disabled.
    poller_config: Option<PollerThreadConfig>,
    polling: Mutex<PollingState>,
    exposure: ExposureReporter<'a>,
    rules: Box<dyn RuleEvaluator + Send + Sync + 'a>,
}

enum PollingState {
    Stopped,
    /// `poller` is `None` if polling is disabled and only the initial fetch was made.
    Started { poller: Option<PollerThread> },
}

impl<'a> LocalFlagsProvider<'a> {
    /// Create a new `LocalFlagsProvider` using the specified configuration.
    ///
    /// ```
    /// # use mixpanel_flags::{LocalFlagsConfig, LocalFlagsProvider};
    /// let provider = LocalFlagsProvider::new(LocalFlagsConfig::from_token("project-token"));
    /// ```
    ///
    /// # Errors
    ///
    /// [`Error::InvalidApiHost`](crate::Error::InvalidApiHost) if the API host does not form a
    /// valid URL, [`Error::Network`](crate::Error::Network) if the HTTP client could not be built.
    pub fn new(config: LocalFlagsConfig<'a>) -> Result<Self> {
        let config = config.normalized();

        let client = match config.http_client {
            Some(client) => client,
            None => reqwest::blocking::Client::builder()
                .timeout(config.request_timeout)
                .build()?,
        };
        let fetcher = DefinitionsFetcher::new(client, &config.api_host, config.token)?;

        let poller_config = config.enable_polling.then(|| PollerThreadConfig {
            interval: config.polling_interval,
            jitter: config.polling_jitter,
        });

        Ok(LocalFlagsProvider {
            store: Arc::new(DefinitionsStore::new()),
            fetcher: Arc::new(fetcher),
            poller_config,
            polling: Mutex::new(PollingState::Stopped),
            exposure: ExposureReporter::new(config.exposure_tracker, "local"),
            rules: config.rule_evaluator,
        })
    }

    /// Fetch flag definitions once and publish them for evaluation.
    ///
    /// On error, previously fetched definitions keep being served.
    pub fn fetch_flag_definitions(&self) -> Result<()> {
        let definitions = self.fetcher.fetch_definitions()?;
        self.store.set_definitions(definitions);
        Ok(())
    }

    /// Fetch flag definitions and, if polling is enabled, start a background thread that keeps
    /// refreshing them.
    ///
    /// Calling this again before [`LocalFlagsProvider::stop_polling_for_definitions`] does nothing.
    ///
    /// # Errors
    ///
    /// Errors of the initial fetch are returned to the caller and polling is not started.
    pub fn start_polling_for_definitions(&self) -> Result<()> {
        let mut state = self.lock_polling();
        if let PollingState::Started { .. } = *state {
            log::debug!(target: "mixpanel", "polling for flag definitions is already started");
            return Ok(());
        }

        self.fetch_flag_definitions()?;

        let poller = match &self.poller_config {
            Some(config) => Some(PollerThread::start(
                self.fetcher.clone(),
                self.store.clone(),
                config.clone(),
            )?),
            None => None,
        };
        *state = PollingState::Started { poller };

        log::debug!(target: "mixpanel",
                    polling = self.poller_config.is_some();
                    "started flag definitions provider");
        Ok(())
    }

    /// Stop the background polling thread and wait for it to exit.
    ///
    /// Does nothing if polling was never started or is already stopped.
    ///
    /// # Errors
    ///
    /// [`Error::PollerThreadPanicked`](crate::Error::PollerThreadPanicked) if the poller thread
    /// has panicked.
    pub fn stop_polling_for_definitions(&self) -> Result<()> {
        let state = std::mem::replace(&mut *self.lock_polling(), PollingState::Stopped);
        match state {
            PollingState::Started {
                poller: Some(poller),
            } => poller.shutdown(),
            _ => Ok(()),
        }
    }

    /// `true` once flag definitions have been fetched successfully at least once.
    pub fn are_flags_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Evaluate `flag_key` for `context`.
    ///
    /// Returns `fallback` if the flag is unknown, the context lacks the attribute the flag buckets
    /// on, or no rollout matches. When a variant is selected and `report_exposure` is `true`, an
    /// exposure event is sent to the configured tracker.
    pub fn get_variant(
        &self,
        flag_key: &str,
        fallback: SelectedVariant,
        context: &FlagContext,
        report_exposure: bool,
    ) -> SelectedVariant {
        let start = Instant::now();

        let Some(definitions) = self.store.get_definitions() else {
            log::warn!(target: "mixpanel", flag_key;
                       "evaluating a flag before flag definitions have been fetched");
            return fallback;
        };
        let Some(flag) = definitions.get(flag_key) else {
            log::debug!(target: "mixpanel", flag_key; "flag not found");
            return fallback;
        };

        let variant = flag.eval(context, &Fnv1aSharder, self.rules.as_ref());
        let latency = start.elapsed();

        log::trace!(target: "mixpanel",
                    flag_key,
                    context:serde = context,
                    variant:serde = variant;
                    "evaluated a flag");

        match variant {
            Some(variant) => {
                if report_exposure {
                    self.exposure
                        .report(flag_key, &variant, context, Some(latency));
                }
                variant
            }
            None => fallback,
        }
    }

    /// Evaluate `flag_key` and return only the variant value, reporting exposure.
    pub fn get_variant_value(
        &self,
        flag_key: &str,
        fallback: impl Into<Value>,
        context: &FlagContext,
    ) -> Value {
        self.get_variant(flag_key, SelectedVariant::fallback(fallback), context, true)
            .variant_value
    }

    /// `true` iff `flag_key` evaluates to boolean `true` for `context`.
    pub fn is_enabled(&self, flag_key: &str, context: &FlagContext) -> bool {
        self.get_variant_value(flag_key, false, context) == Value::Bool(true)
    }

    /// Evaluate every known flag for `context` without reporting exposure.
    ///
    /// Flags that make no decision for `context` are omitted.
    pub fn get_all_variants(&self, context: &FlagContext) -> HashMap<String, SelectedVariant> {
        let Some(definitions) = self.store.get_definitions() else {
            log::warn!(target: "mixpanel",
                       "evaluating flags before flag definitions have been fetched");
            return HashMap::new();
        };

        definitions
            .iter()
            .filter_map(|(flag_key, flag)| {
                let variant = flag.eval(context, &Fnv1aSharder, self.rules.as_ref())?;
                Some((flag_key.to_owned(), variant))
            })
            .collect()
    }

    /// Manually report exposure of `variant`, e.g. for variants obtained from
    /// [`LocalFlagsProvider::get_all_variants`].
    pub fn track_exposure_event(
        &self,
        flag_key: &str,
        variant: &SelectedVariant,
        context: &FlagContext,
    ) {
        self.exposure.report(flag_key, variant, context, None);
    }

    fn lock_polling(&self) -> std::sync::MutexGuard<'_, PollingState> {
        self.polling
            .lock()
            .expect("thread holding polling lock should not panic")
    }
}

impl Drop for LocalFlagsProvider<'_> {
    fn drop(&mut self) {
        let state = match self.polling.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let PollingState::Started {
            poller: Some(poller),
        } = std::mem::replace(state, PollingState::Stopped)
        {
            if let Err(err) = poller.shutdown() {
                log::warn!(target: "mixpanel", error:display = err; "failed to stop poller thread");
            }
        }
    }
}
