//! Local evaluation of Mixpanel feature flags.
//!
//! # Overview
//!
//! The crate revolves around a [`LocalFlagsProvider`] that downloads flag definitions from
//! Mixpanel, keeps them fresh with a background poller thread, and evaluates flags in-process for a
//! caller-supplied [`FlagContext`]. Evaluation results in a [`SelectedVariant`] describing the
//! variant assigned to the subject.
//!
//! Subjects are assigned to rollouts and variants by deterministic hashing, so every process (and
//! every other Mixpanel SDK) assigns the same subject to the same variant.
//!
//! An [`ExposureTracker`] should be provided to forward exposure events to Mixpanel, facilitating
//! tracking of which user was exposed to which variant.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum and are only returned by operations that talk to
//! the network: fetching definitions and starting or stopping the poller. Flag evaluation never
//! fails; it falls back to the value supplied by the caller.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `mixpanel` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into flag evaluation.
//!
//! # Examples
//!
//! A runnable example can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod config;
mod definitions_fetcher;
mod definitions_store;
mod error;
mod eval;
mod exposure;
mod models;
mod poller;
mod provider;
mod rules;
mod sharder;

pub use config::LocalFlagsConfig;
pub use definitions_fetcher::DefinitionsFetcher;
pub use definitions_store::DefinitionsStore;
pub use error::{Error, Result};
pub use exposure::{ExposureTracker, EXPOSURE_EVENT_NAME};
pub use models::{
    ExperimentationFlag, FlagContext, FlagDefinitions, FlagTestUsers, Rollout, RuleSet,
    SelectedVariant, Variant, VariantOverride, CUSTOM_PROPERTIES, DISTINCT_ID,
};
pub use poller::{PollerThread, PollerThreadConfig};
pub use provider::LocalFlagsProvider;
pub use rules::{JsonLogic, RuleError, RuleEvaluator};
pub use sharder::{normalized_hash, Fnv1aSharder, Sharder};
