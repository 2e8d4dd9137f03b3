//! Core value types shared across the supervisor crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Loopback address the worker listens on unless configured otherwise.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the worker listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8188;

/// Path of the worker's health/statistics resource.
pub const DEFAULT_HEALTH_PATH: &str = "/system_stats";

/// Where the health probe sends its requests.
///
/// The host is stored already normalised: a wildcard listen address is not
/// something a client can connect to, so it is mapped to the matching
/// loopback address.
///
/// # Example
/// ```
/// use wsv_common::HealthEndpoint;
///
/// let endpoint = HealthEndpoint::new("0.0.0.0", 8188);
/// assert_eq!(endpoint.url(), "http://127.0.0.1:8188/system_stats");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEndpoint {
    host: String,
    port: u16,
    path: String,
}

impl HealthEndpoint {
    /// Creates an endpoint for `host:port` using the default health path.
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: normalize_host(host.as_ref()),
            port,
            path: DEFAULT_HEALTH_PATH.to_string(),
        }
    }

    /// Replaces the request path. A missing leading slash is added.
    pub fn with_path(mut self, path: impl AsRef<str>) -> Self {
        let path = path.as_ref().trim();
        self.path = if path.is_empty() {
            DEFAULT_HEALTH_PATH.to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Full request URL.
    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}{}", self.host, self.port, self.path)
        } else {
            format!("http://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

impl Default for HealthEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for HealthEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    match host {
        "" | "0.0.0.0" | "*" => DEFAULT_HOST.to_string(),
        "::" => "::1".to_string(),
        other => other.to_string(),
    }
}
