use std::time::Duration;

use crate::{
    exposure::ExposureTracker,
    rules::{JsonLogic, RuleEvaluator},
    LocalFlagsProvider, Result,
};

/// Configuration for [`LocalFlagsProvider`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use serde_json::{Map, Value};
/// # use mixpanel_flags::LocalFlagsConfig;
/// let provider = LocalFlagsConfig::from_token("project-token")
///     .polling_interval(Duration::from_secs(30))
///     .exposure_tracker(
///         |distinct_id: &str, event_name: &str, properties: Map<String, Value>| {
///             println!("{distinct_id} {event_name} {properties:?}");
///         },
///     )
///     .to_provider()
///     .unwrap();
/// ```
pub struct LocalFlagsConfig<'a> {
    pub(crate) token: String,
    pub(crate) api_host: String,
    pub(crate) request_timeout: Duration,
    pub(crate) enable_polling: bool,
    pub(crate) polling_interval: Duration,
    pub(crate) polling_jitter: Duration,
    pub(crate) http_client: Option<reqwest::blocking::Client>,
    pub(crate) exposure_tracker: Option<Box<dyn ExposureTracker + Send + Sync + 'a>>,
    pub(crate) rule_evaluator: Box<dyn RuleEvaluator + Send + Sync + 'a>,
}

impl<'a> LocalFlagsConfig<'a> {
    /// Default API host.
    pub const DEFAULT_API_HOST: &'static str = "api.mixpanel.com";

    /// Default timeout for definitions requests.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default interval between definitions refreshes.
    pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(60);

    /// Create a default configuration using the specified project token.
    ///
    /// ```
    /// # use mixpanel_flags::LocalFlagsConfig;
    /// LocalFlagsConfig::from_token("project-token");
    /// ```
    pub fn from_token(token: impl Into<String>) -> Self {
        LocalFlagsConfig {
            token: token.into(),
            api_host: Self::DEFAULT_API_HOST.to_owned(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            enable_polling: true,
            polling_interval: Self::DEFAULT_POLLING_INTERVAL,
            polling_jitter: Duration::ZERO,
            http_client: None,
            exposure_tracker: None,
            rule_evaluator: Box::new(JsonLogic),
        }
    }

    /// Override API host. Either a bare host name (reached over https) or a base URL with a
    /// scheme, e.g. `http://localhost:8080`.
    pub fn api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = api_host.into();
        self
    }

    /// Timeout for each definitions request. Ignored if a custom HTTP client is supplied.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Enable or disable background refresh of definitions. When disabled, definitions are only
    /// fetched on start and by explicit calls to
    /// [`LocalFlagsProvider::fetch_flag_definitions`].
    pub fn enable_polling(mut self, enable_polling: bool) -> Self {
        self.enable_polling = enable_polling;
        self
    }

    /// Interval between background refreshes.
    pub fn polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    /// Maximum random duration subtracted from each polling interval.
    pub fn polling_jitter(mut self, polling_jitter: Duration) -> Self {
        self.polling_jitter = polling_jitter;
        self
    }

    /// Use a custom HTTP client for definitions requests.
    pub fn http_client(mut self, http_client: reqwest::blocking::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Set exposure tracker to forward exposure events to Mixpanel ingestion.
    ///
    /// ```
    /// # use serde_json::{Map, Value};
    /// # use mixpanel_flags::LocalFlagsConfig;
    /// let config = LocalFlagsConfig::from_token("project-token").exposure_tracker(
    ///     |distinct_id: &str, event_name: &str, properties: Map<String, Value>| {
    ///         println!("{distinct_id} {event_name} {properties:?}");
    ///     },
    /// );
    /// ```
    pub fn exposure_tracker(
        mut self,
        exposure_tracker: impl ExposureTracker + Send + Sync + 'a,
    ) -> Self {
        self.exposure_tracker = Some(Box::new(exposure_tracker));
        self
    }

    /// Replace the JsonLogic evaluator used for runtime evaluation rules.
    pub fn rule_evaluator(mut self, rule_evaluator: impl RuleEvaluator + Send + Sync + 'a) -> Self {
        self.rule_evaluator = Box::new(rule_evaluator);
        self
    }

    /// Create a new [`LocalFlagsProvider`] using this configuration.
    ///
    /// Definitions are not fetched until
    /// [`LocalFlagsProvider::start_polling_for_definitions`] is called.
    pub fn to_provider(self) -> Result<LocalFlagsProvider<'a>> {
        LocalFlagsProvider::new(self)
    }

    /// Zero durations fall back to their defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.api_host.is_empty() {
            self.api_host = Self::DEFAULT_API_HOST.to_owned();
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = Self::DEFAULT_REQUEST_TIMEOUT;
        }
        if self.polling_interval.is_zero() {
            self.polling_interval = Self::DEFAULT_POLLING_INTERVAL;
        }
        self
    }
}
