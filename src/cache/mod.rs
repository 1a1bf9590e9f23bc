//! Time-bucketed TTL cache.
//!
//! Used by ingest to skip ids already seen within a retention window.
//!
//! ```rust
//! use quota_ingest::cache::TtlCache;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let seen: TtlCache<u64, ()> = TtlCache::new(Duration::from_secs(24 * 3600));
//! seen.set(1234, (), Duration::from_secs(3600));
//! assert!(seen.contains(&1234));
//! # }
//! ```

mod ttl;

pub use ttl::{CacheStats, TtlCache};
