//! Request batching.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MicroBatcher`] | Groups single items into batches by size or by time, with a cooldown floor |
//! | [`BatchCollector`] | Staging buffer the batcher drains from |
//! | [`BatchExecutor`] | Bounded-concurrency fan-out over one batch |
//!
//! ## Example
//!
//! ```rust,no_run
//! use quota_ingest::batch::{BatcherConfig, MicroBatcher};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> quota_ingest::Result<()> {
//! let cfg = BatcherConfig::new()
//!     .with_batch_size(50)
//!     .with_timeout(Duration::from_secs(60))
//!     .with_cooldown(Duration::from_secs(1));
//! let batcher = MicroBatcher::new(cfg, |ids: Vec<u64>| async move {
//!     println!("refreshing {} users", ids.len());
//! });
//! batcher.start(CancellationToken::new())?;
//! batcher.add(2).await?;
//! # Ok(())
//! # }
//! ```

mod batcher;
mod collector;
mod executor;

pub use batcher::{BatchSink, BatcherConfig, BatcherSnapshot, MicroBatcher};
pub use collector::{BatchAddResult, BatchCollector};
pub use executor::{BatchExecutor, BatchResult};
