use std::sync::Arc;

/// Result type for fallible operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned while fetching flag definitions or managing the poller thread.
///
/// Flag evaluation itself never returns an error. Misconfigured flags and missing context
/// attributes degrade to the caller-provided fallback instead.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The configured API host cannot be turned into a valid URL.
    #[error("invalid api_host configuration")]
    InvalidApiHost(#[source] url::ParseError),

    /// Transport-level failure (connection refused, timeout, TLS, ...).
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The server answered with a non-2xx status code.
    #[error("unexpected status code: {status}, body: {body}")]
    UnexpectedStatus {
        /// HTTP status code of the response.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// Response body is not a valid flag definitions payload.
    #[error("failed to decode flag definitions response")]
    InvalidResponse(#[source] Arc<serde_json::Error>),

    /// An I/O error, e.g. failure to spawn the poller thread.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::InvalidResponse(Arc::new(value))
    }
}
