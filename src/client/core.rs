use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::remote_gate::RemoteGate;
use crate::resilience::retry::RetryPolicy;
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::signals::{InflightSnapshot, SignalsSnapshot};

/// The single gateway every outbound call goes through.
///
/// A call waits on the shared [`RemoteGate`] first and on the local token bucket second,
/// then runs with a bounded number of stale-connection retries. Every response feeds its
/// quota headers back into the gate; a 429 blocks the gate for everyone and is returned as
/// [`Error::RateLimited`].
pub struct LimitedClient {
    pub(crate) transport: HttpTransport,
    pub(crate) gate: RemoteGate,
    pub(crate) local: Arc<RateLimiter>,
    pub(crate) retry: RetryPolicy,
    pub(crate) inflight: Arc<Semaphore>,
    pub(crate) max_inflight: usize,
}

impl LimitedClient {
    pub fn builder() -> super::LimitedClientBuilder {
        super::LimitedClientBuilder::new()
    }

    pub fn gate(&self) -> &RemoteGate {
        &self.gate
    }

    pub fn http(&self) -> &reqwest::Client {
        self.transport.client()
    }

    /// Issue `request` once both gates allow it.
    ///
    /// Non-2xx statuses other than 429 are returned as responses; mapping them to errors is
    /// the caller's business (see [`crate::client::Fetcher`]).
    pub async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let _permit = self.inflight.acquire().await.map_err(|_| {
            Error::runtime_with_context(
                "Backpressure semaphore closed",
                ErrorContext::new().with_source("backpressure"),
            )
        })?;

        let request_id = Uuid::new_v4();
        let path = request.url().path().to_string();
        let mut request = Some(request);
        let mut attempt = 1u32;

        loop {
            // Keep the original around for a possible retry when the body allows it.
            let Some(current) = request
                .as_ref()
                .and_then(|r| r.try_clone())
                .or_else(|| request.take())
            else {
                return Err(Error::runtime_with_context(
                    "request cannot be replayed",
                    ErrorContext::new()
                        .with_details(path)
                        .with_source("limited_client"),
                ));
            };

            self.gate.check().await;
            self.local.acquire().await;

            let start = tokio::time::Instant::now();
            let resp = match self.transport.send(current).await {
                Ok(resp) => resp,
                Err(e) => match self.retry.should_retry(attempt, &e) {
                    Some(delay) => {
                        warn!(
                            request_id = %request_id,
                            path = path.as_str(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "stale connection, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    None => {
                        info!(
                            request_id = %request_id,
                            path = path.as_str(),
                            attempt,
                            error = %e,
                            "outbound call failed"
                        );
                        return Err(Error::Transport(e));
                    }
                },
            };

            self.gate.observe_headers(resp.headers(), start);

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                self.gate.on_rate_limited();
                return Err(Error::RateLimited { path });
            }

            debug!(
                request_id = %request_id,
                path = path.as_str(),
                http_status = status.as_u16(),
                duration_ms = start.elapsed().as_millis() as u64,
                "outbound call completed"
            );
            return Ok(resp);
        }
    }

    /// Snapshot current runtime signals (facts only).
    pub async fn signals(&self) -> SignalsSnapshot {
        let available = self.inflight.available_permits();
        SignalsSnapshot {
            inflight: InflightSnapshot {
                max: self.max_inflight,
                available,
                in_use: self.max_inflight.saturating_sub(available),
            },
            rate_limiter: self.local.snapshot().await,
            remote: self.gate.snapshot(),
        }
    }
}
