use crate::client::core::LimitedClient;
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::resilience::remote_gate::{RemoteGate, RemoteGateConfig};
use crate::resilience::retry::RetryPolicy;
use crate::transport::{HttpTransport, HttpTransportConfig, ProxyRotator};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Builder for [`LimitedClient`].
///
/// Keep this surface area small and predictable.
pub struct LimitedClientBuilder {
    rate_limiter: RateLimiterConfig,
    remote: RemoteGateConfig,
    gate: Option<RemoteGate>,
    retry: RetryPolicy,
    max_inflight: usize,
    transport: HttpTransportConfig,
    proxies: Option<Arc<ProxyRotator>>,
}

impl LimitedClientBuilder {
    pub fn new() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::default(),
            remote: RemoteGateConfig::default(),
            gate: None,
            retry: RetryPolicy::default(),
            max_inflight: 20,
            transport: HttpTransportConfig::default(),
            proxies: None,
        }
    }

    /// Steady local rate. Invalid values (negative, NaN) are ignored.
    pub fn rate_limit_rps(mut self, rps: f64) -> Self {
        if let Some(cfg) = RateLimiterConfig::from_rps(rps) {
            self.rate_limiter = cfg;
        }
        self
    }

    pub fn rate_limiter(mut self, cfg: RateLimiterConfig) -> Self {
        self.rate_limiter = cfg;
        self
    }

    pub fn remote_gate(mut self, cfg: RemoteGateConfig) -> Self {
        self.remote = cfg;
        self
    }

    /// Share an existing gate, e.g. between several clients hitting the same quota.
    pub fn shared_gate(mut self, gate: RemoteGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Limit maximum number of in-flight requests.
    pub fn max_inflight(mut self, n: usize) -> Self {
        self.max_inflight = n.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout = timeout;
        self
    }

    pub fn proxies(mut self, proxies: Arc<ProxyRotator>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn build(self) -> Result<LimitedClient> {
        let transport = HttpTransport::new(&self.transport, self.proxies)?;
        let gate = self.gate.unwrap_or_else(|| RemoteGate::new(self.remote));

        Ok(LimitedClient {
            transport,
            gate,
            local: Arc::new(RateLimiter::new(self.rate_limiter)),
            retry: self.retry,
            inflight: Arc::new(Semaphore::new(self.max_inflight)),
            max_inflight: self.max_inflight,
        })
    }
}

impl Default for LimitedClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
