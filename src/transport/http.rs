use super::proxy::ProxyRotator;
use super::TransportError;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Absolute timeout for every outbound call.
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            user_agent: format!("quota-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Thin wrapper over a configured `reqwest::Client`. Performs a single attempt per call;
/// gating and retry live in [`crate::client::LimitedClient`].
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    proxies: Option<Arc<ProxyRotator>>,
}

impl HttpTransport {
    pub fn new(cfg: &HttpTransportConfig, proxies: Option<Arc<ProxyRotator>>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(cfg.user_agent.clone())
            .pool_idle_timeout(Some(cfg.pool_idle_timeout))
            // Conservative HTTP/2 keepalive defaults for long-lived connections.
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        let proxies = proxies.filter(|p| !p.is_empty());
        builder = match &proxies {
            // Each request may leave through a different proxy, so pooled connections are useless.
            Some(rotator) => builder
                .proxy(rotator.clone().into_reqwest_proxy())
                .pool_max_idle_per_host(0),
            None => builder.pool_max_idle_per_host(cfg.pool_max_idle_per_host),
        };

        let client = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self { client, proxies })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.as_ref().map_or(0, |p| p.len())
    }

    pub async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, TransportError> {
        self.client.execute(request).await.map_err(TransportError::Http)
    }
}
