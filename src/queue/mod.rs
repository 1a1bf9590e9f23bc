//! Deduplicating work queue with a priority lane and a bounded worker pool.
//!
//! ```rust,no_run
//! use quota_ingest::queue::{OpMask, QueueConfig, WorkQueue};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> quota_ingest::Result<()> {
//! let queue = WorkQueue::new(&QueueConfig::default(), |id: u64, mask: OpMask| async move {
//!     println!("refresh {id} for {mask}");
//!     Ok::<(), quota_ingest::Error>(())
//! });
//! queue.start(CancellationToken::new())?;
//! queue.run_workers(4);
//! queue.enqueue(42, OpMask::bit(0), false).await?;
//! queue.enqueue(42, OpMask::bit(3), true).await?; // merged, not queued twice
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod mask;

pub use dispatcher::{DispatchHandler, QueueConfig, QueueSnapshot, WorkQueue};
pub use mask::OpMask;
