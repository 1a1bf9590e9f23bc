//! # Resilience Primitives Module
//!
//! The gates and policies every outbound call goes through.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`remote_gate`] | Shared upstream quota view, blocked by low-water headers or 429 |
//! | [`rate_limiter`] | Steady-rate token bucket bounding the absolute call rate |
//! | [`retry`] | Bounded linear-backoff retry for stale-connection transport failures |
//!
//! A call passes the remote gate first and the local bucket second:
//!
//! ```rust
//! use quota_ingest::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//! use quota_ingest::resilience::remote_gate::{RemoteGate, RemoteGateConfig};
//!
//! # async fn call() {
//! let gate = RemoteGate::new(RemoteGateConfig::default());
//! let local = RateLimiter::new(RateLimiterConfig::from_rps(5.0).unwrap());
//!
//! gate.check().await;
//! local.acquire().await;
//! // issue the request, then feed the response back:
//! gate.observe(1200, 1150);
//! # }
//! ```

pub mod rate_limiter;
pub mod remote_gate;
pub mod retry;
