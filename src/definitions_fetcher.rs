//! An HTTP client that fetches flag definitions from the server.
use rand::{thread_rng, Rng};
use reqwest::{header::CONTENT_TYPE, Url};

use crate::{
    models::{FlagDefinitions, FlagsResponse},
    Error, Result,
};

const DEFINITIONS_ENDPOINT: &str = "/flags/definitions";

/// Library name reported to the server.
const LIB_NAME: &str = "rust";

/// A client that fetches flag definitions from the server.
pub struct DefinitionsFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    url: Url,
    token: String,
}

impl DefinitionsFetcher {
    /// Create a fetcher for `api_host`.
    ///
    /// `api_host` is either a bare host name (reached over https) or a base URL that includes a
    /// scheme.
    pub fn new(
        client: reqwest::blocking::Client,
        api_host: &str,
        token: impl Into<String>,
    ) -> Result<DefinitionsFetcher> {
        let token = token.into();
        let base_url = if api_host.contains("://") {
            api_host.trim_end_matches('/').to_owned()
        } else {
            format!("https://{api_host}")
        };

        let url = Url::parse_with_params(
            &format!("{base_url}{DEFINITIONS_ENDPOINT}"),
            &[
                ("token", token.as_str()),
                ("mp_lib", LIB_NAME),
                ("$lib_version", env!("CARGO_PKG_VERSION")),
            ],
        )
        .map_err(Error::InvalidApiHost)?;

        Ok(DefinitionsFetcher { client, url, token })
    }

    /// Fetch and parse the full list of flag definitions.
    pub fn fetch_definitions(&self) -> Result<FlagDefinitions> {
        log::debug!(target: "mixpanel", "fetching flag definitions");

        let response = self
            .client
            .get(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header("traceparent", traceparent())
            .basic_auth(&self.token, None::<&str>)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            log::warn!(target: "mixpanel",
                       status = status.as_u16();
                       "received non-2xx response while fetching flag definitions");
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes()?;
        let definitions = serde_json::from_slice::<FlagsResponse>(&body)?.into_definitions();

        log::debug!(target: "mixpanel",
                    flags = definitions.len();
                    "successfully fetched flag definitions");

        Ok(definitions)
    }
}

/// Generate a W3C `traceparent` header value: `00-{trace-id}-{parent-id}-{trace-flags}`.
fn traceparent() -> String {
    let mut rng = thread_rng();
    let trace_id: [u8; 16] = rng.gen();
    let span_id: [u8; 8] = rng.gen();
    format!("00-{}-{}-01", hex::encode(trace_id), hex::encode(span_id))
}
