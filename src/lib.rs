//! # quota-ingest
//!
//! Adaptive rate-limited fetch pipeline feeding a deduplicating work queue.
//!
//! ## Overview
//!
//! All outbound traffic goes through one [`LimitedClient`], which passes every call through two
//! gates: a shared remote gate that adapts to the server's quota headers and 429 responses,
//! and a local token bucket that caps the steady call rate. Work is scheduled on top of it:
//!
//! - **Work queue**: [`WorkQueue`] merges repeated requests for the same id into one bitmask,
//!   prefers a priority lane, and requeues failures with priority.
//! - **Micro-batcher**: [`MicroBatcher`] groups single items into batches by size or time,
//!   with a cooldown floor between flushes.
//! - **TTL cache**: [`TtlCache`] expires entries lazily on read and sweeps one minute bucket
//!   at a time.
//!
//! The [`ingest`] module wires these into a score-feed ingester.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quota_ingest::client::Fetcher;
//! use quota_ingest::config::IngestConfig;
//!
//! #[tokio::main]
//! async fn main() -> quota_ingest::Result<()> {
//!     let cfg = IngestConfig::from_env();
//!     let fetcher = Fetcher::from_config(&cfg).await?;
//!     let body = fetcher.fetch("/scores").await?;
//!     println!("{} bytes", body.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Rate-limited client, credentials and the fetch surface |
//! | [`resilience`] | Local token bucket, remote quota gate and transport retry |
//! | [`transport`] | HTTP transport and proxy rotation |
//! | [`queue`] | Deduplicating priority work queue |
//! | [`batch`] | Micro-batcher and bounded fan-out |
//! | [`cache`] | Time-bucketed TTL cache |
//! | [`ingest`] | Score feed ingestion and user refresh |
//! | [`config`] | Environment and YAML configuration |

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod ingest;
pub mod queue;
pub mod resilience;
pub mod transport;

// Re-export main types for convenience
pub use batch::{BatchSink, BatcherConfig, MicroBatcher};
pub use cache::TtlCache;
pub use client::{Fetcher, LimitedClient, LimitedClientBuilder};
pub use config::IngestConfig;
pub use queue::{DispatchHandler, OpMask, QueueConfig, WorkQueue};
pub use resilience::remote_gate::RemoteGate;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
