use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "/proxy";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Settings handed to the request handler at construction.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Shared secret callers must present. `None` leaves the relay open.
    pub access_key: Option<String>,
    /// Path the relay is mounted on; also the path embedded in rewritten links.
    pub endpoint_path: String,
    pub upstream_timeout: Duration,
    /// Largest inbound request body accepted for forwarding.
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            endpoint_path: DEFAULT_ENDPOINT.to_string(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ProxyConfig {
    /// Empty keys count as unset.
    pub fn with_access_key(mut self, key: Option<String>) -> Self {
        self.access_key = key.filter(|k| !k.is_empty());
        self
    }

    /// Leading slash added, trailing slashes dropped (`"relay/"` becomes `"/relay"`).
    pub fn with_endpoint_path(mut self, path: &str) -> Self {
        let trimmed = path.trim().trim_matches('/');
        self.endpoint_path = format!("/{trimmed}");
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}
