use crate::resilience::rate_limiter::RateLimiterSnapshot;
use crate::resilience::remote_gate::RemoteGateSnapshot;

/// A lightweight snapshot of the client's gates, for logging and health reporting.
///
/// This is intentionally *facts only* (no policy).
#[derive(Debug, Clone)]
pub struct SignalsSnapshot {
    pub inflight: InflightSnapshot,
    pub rate_limiter: RateLimiterSnapshot,
    pub remote: RemoteGateSnapshot,
}

#[derive(Debug, Clone)]
pub struct InflightSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}
