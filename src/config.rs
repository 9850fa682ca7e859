use crate::errors::FanoutError;
use hyper::Method;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const DEFAULT_METHOD: &str = "POST";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:7000/api/v2/device/send";
pub const DEFAULT_FANOUT_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CLIENTS: i64 = 10_000;
pub const DEFAULT_CONCURRENCY: usize = 1_000;
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 20;

/// Externally-supplied options for building a fanout service.
///
/// Every field carries a default, so an empty configuration object yields a
/// working single-endpoint fanout against [`DEFAULT_ENDPOINT`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FanoutOptions {
    /// HTTP method used for every replica.
    #[serde(default = "default_method")]
    pub method: String,

    /// Downstream URLs to fan out to. An explicitly empty list is allowed
    /// and makes every fanout fail with 503 without dispatching.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Basic Auth token attached to every replica. No default.
    #[serde(default)]
    pub authorization: Option<String>,

    /// Deadline for the entire fanout operation.
    #[serde(default = "default_fanout_timeout_secs")]
    pub fanout_timeout_secs: u64,

    /// Per-replica HTTP client timeout.
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,

    /// Process-wide cap on in-flight requests. Should be larger than
    /// `concurrency`.
    #[serde(default = "default_max_clients")]
    pub max_clients: i64,

    /// Per-fanout cap on concurrent invocations.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Idle connection pool size per downstream host.
    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

fn default_endpoints() -> Vec<String> {
    vec![DEFAULT_ENDPOINT.to_string()]
}

fn default_fanout_timeout_secs() -> u64 {
    DEFAULT_FANOUT_TIMEOUT_SECS
}

fn default_client_timeout_secs() -> u64 {
    DEFAULT_CLIENT_TIMEOUT_SECS
}

fn default_max_clients() -> i64 {
    DEFAULT_MAX_CLIENTS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_idle_conns_per_host() -> usize {
    DEFAULT_MAX_IDLE_CONNS_PER_HOST
}

impl Default for FanoutOptions {
    fn default() -> Self {
        FanoutOptions {
            method: default_method(),
            endpoints: default_endpoints(),
            authorization: None,
            fanout_timeout_secs: default_fanout_timeout_secs(),
            client_timeout_secs: default_client_timeout_secs(),
            max_clients: default_max_clients(),
            concurrency: default_concurrency(),
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
        }
    }
}

impl FanoutOptions {
    /// Parses the configured endpoints, failing construction on the first
    /// invalid URL.
    pub fn urls(&self) -> Result<Vec<Url>, FanoutError> {
        self.endpoints
            .iter()
            .map(|endpoint| {
                Url::parse(endpoint)
                    .map_err(|e| FanoutError::InvalidEndpoint(endpoint.clone(), e))
            })
            .collect()
    }

    pub fn parsed_method(&self) -> Result<Method, FanoutError> {
        self.method
            .parse()
            .map_err(|_| FanoutError::InvalidMethod(self.method.clone()))
    }

    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_secs(self.fanout_timeout_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}
