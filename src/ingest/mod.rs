//! Score feed ingestion and user refresh, built on the generic queue, batcher and cache.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ScoreIngestor`] | Polls the global score feed and fans out over each page |
//! | [`UserRefresher`] | Work-queue handler refreshing one user per set ruleset bit |
//! | [`BatchUserRefresher`] | Micro-batcher sink refreshing up to 50 users per call |
//! | [`StatsReporter`] | Hourly counters pushed to a webhook |

pub mod cursor;
pub mod notify;
pub mod records;
mod scores;
pub mod store;
mod users;

pub use cursor::CursorFile;
pub use notify::{StatsReport, StatsReporter};
pub use records::{Ruleset, Score, ScoresPage, User, UserStatistics, UsersPage};
pub use scores::{IngestReport, ScoreIngestor};
pub use store::{MemoryStore, Store};
pub use users::{schedule_full_refresh, BatchUserRefresher, KnownUsers, UserRefresher};

use crate::cache::TtlCache;
use crate::client::Fetcher;
use crate::queue::WorkQueue;
use crate::Result;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Hours a stored score stays in the seen-scores cache after it was played.
pub const SCORE_RETENTION_HOURS: i64 = 24;

/// Collaborators shared by every ingest component.
#[derive(Clone)]
pub struct IngestContext {
    pub fetcher: Fetcher,
    pub store: Arc<dyn Store>,
    pub known: Arc<KnownUsers>,
    pub seen_scores: Arc<TtlCache<u64, ()>>,
    pub reporter: Arc<StatsReporter>,
    pub include_failed: bool,
    pub dump_dir: PathBuf,
}

impl IngestContext {
    /// Insert `score` unless it was seen within the retention window. Returns whether it was new.
    pub async fn remember_score(&self, score: &Score) -> Result<bool> {
        if self.seen_scores.contains(&score.id) {
            return Ok(false);
        }
        let inserted = self.store.insert_score(score).await?;
        if inserted {
            self.reporter.score_stored();
        }
        let keep = (score.ended_at + TimeDelta::hours(SCORE_RETENTION_HOURS) - Utc::now()).to_std();
        if let Ok(keep) = keep {
            self.seen_scores.set(score.id, (), keep);
        }
        Ok(inserted)
    }

    /// Save an undecodable payload and the decoder's message for inspection.
    pub async fn dump_payload(&self, payload: &Bytes, reason: &str) {
        let data = self.dump_dir.join("data.json");
        let error = self.dump_dir.join("error.txt");
        if let Err(e) = tokio::fs::write(&data, payload).await {
            warn!(error = %e, path = %data.display(), "cannot write payload dump");
            return;
        }
        if let Err(e) = tokio::fs::write(&error, reason).await {
            warn!(error = %e, path = %error.display(), "cannot write payload dump");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub users: usize,
    pub queued: usize,
}

/// Mark stored users as known and queue, with priority, every update they are still owed.
pub async fn restore(ctx: &IngestContext, queue: &WorkQueue<u64>) -> Result<RestoreReport> {
    let users = ctx.store.known_users().await?;
    for id in &users {
        ctx.known.insert(*id);
    }
    ctx.reporter.set_users_tracked(ctx.known.len());

    let pending = ctx.store.pending_updates().await?;
    let queued = pending.len();
    let queue = queue.clone();
    tokio::spawn(async move {
        for (id, ruleset) in pending {
            if queue.enqueue(id, ruleset.bit(), true).await.is_err() {
                break;
            }
        }
    });

    info!(users = users.len(), queued, "restored ingest state");
    Ok(RestoreReport {
        users: users.len(),
        queued,
    })
}
