//! Server address resolution.

use crate::vpn_core::error::{VpnError, VpnResult};
use std::future::Future;
use std::time::Duration;

/// Default deadline for one registry request.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves which tunnel server to connect to.
pub trait Discovery: Send + Sync + 'static {
    /// Ask for a server address. `Ok(None)` means the source had none to give.
    fn resolve(&self) -> impl Future<Output = VpnResult<Option<String>>> + Send;

    /// When true, failing to resolve is retried instead of falling back to the
    /// statically configured address.
    fn is_mandatory(&self) -> bool;
}

/// No discovery source; the static server address is always used.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiscovery;

impl Discovery for NoDiscovery {
    async fn resolve(&self) -> VpnResult<Option<String>> {
        Ok(None)
    }

    fn is_mandatory(&self) -> bool {
        false
    }
}

/// Registry reachable over HTTP whose response body is the server address.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: reqwest::Client,
    url: String,
    mandatory: bool,
    timeout: Duration,
}

impl HttpDiscovery {
    pub fn new(client: reqwest::Client, url: impl Into<String>, mandatory: bool) -> Self {
        Self {
            client,
            url: url.into(),
            mandatory,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Override the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Discovery for HttpDiscovery {
    async fn resolve(&self) -> VpnResult<Option<String>> {
        let body = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| VpnError::Discovery(format!("Registry request failed: {}", e)))?
            .text()
            .await
            .map_err(|e| VpnError::Discovery(format!("Failed to read registry reply: {}", e)))?;

        let addr = body.trim();
        if addr.is_empty() {
            Ok(None)
        } else {
            Ok(Some(addr.to_string()))
        }
    }

    fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

/// Discovery chosen at startup from configuration.
#[derive(Debug, Clone)]
pub enum ServerDiscovery {
    Static(NoDiscovery),
    Http(HttpDiscovery),
}

impl ServerDiscovery {
    /// HTTP discovery when a registry URL is configured, static otherwise.
    pub fn from_url(client: reqwest::Client, url: Option<&str>, mandatory: bool) -> Self {
        match url {
            Some(url) => Self::Http(HttpDiscovery::new(client, url, mandatory)),
            None => Self::Static(NoDiscovery),
        }
    }
}

impl Discovery for ServerDiscovery {
    async fn resolve(&self) -> VpnResult<Option<String>> {
        match self {
            Self::Static(d) => d.resolve().await,
            Self::Http(d) => d.resolve().await,
        }
    }

    fn is_mandatory(&self) -> bool {
        match self {
            Self::Static(d) => d.is_mandatory(),
            Self::Http(d) => d.is_mandatory(),
        }
    }
}
