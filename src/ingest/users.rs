use super::records::{Ruleset, Score, User, UsersPage};
use super::IngestContext;
use crate::batch::{BatchSink, MicroBatcher};
use crate::queue::{DispatchHandler, OpMask, WorkQueue};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ids of unrestricted users already stored.
#[derive(Debug, Default)]
pub struct KnownUsers {
    ids: RwLock<HashSet<u64>>,
}

impl KnownUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `id` was not known before.
    pub fn insert(&self, id: u64) -> bool {
        self.ids.write().unwrap_or_else(|p| p.into_inner()).insert(id)
    }

    pub fn remove(&self, id: u64) -> bool {
        self.ids.write().unwrap_or_else(|p| p.into_inner()).remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.read().unwrap_or_else(|p| p.into_inner()).contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.ids
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .copied()
            .collect()
    }
}

async fn retire(ctx: &IngestContext, id: u64) -> Result<()> {
    ctx.store.restrict_user(id).await?;
    ctx.known.remove(id);
    ctx.reporter.set_users_tracked(ctx.known.len());
    info!(user_id = id, "user no longer available, restricted");
    Ok(())
}

/// Work-queue handler: refreshes profile, statistics and recent scores of one user for each
/// ruleset bit in the mask.
pub struct UserRefresher {
    ctx: Arc<IngestContext>,
}

impl UserRefresher {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self { ctx }
    }

    async fn recent_scores(&self, id: u64, ruleset: Ruleset) -> Result<usize> {
        let path = format!(
            "/users/{id}/scores/recent?mode={}&include_fails={}&limit=100",
            ruleset.name(),
            u8::from(self.ctx.include_failed)
        );
        let scores: Vec<Score> = self.ctx.fetcher.fetch_json(&path).await?;
        let mut inserted = 0;
        for score in &scores {
            if self.ctx.remember_score(score).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[async_trait]
impl DispatchHandler<u64> for UserRefresher {
    async fn handle(&self, id: u64, mask: OpMask) -> Result<()> {
        let mut latest: Option<User> = None;

        for ruleset in Ruleset::in_mask(mask) {
            let path = format!("/users/{id}?mode={}", ruleset.id());
            let user: User = match self.ctx.fetcher.fetch_json(&path).await {
                Ok(user) => user,
                Err(e) if e.is_not_found() => return retire(&self.ctx, id).await,
                Err(Error::Decode { source, payload }) => {
                    self.ctx
                        .dump_payload(&payload, &format!("user {id}: {source}"))
                        .await;
                    return Err(Error::decode(source, payload));
                }
                Err(e) => return Err(e),
            };

            match self.recent_scores(id, ruleset).await {
                Ok(inserted) => debug!(user_id = id, %ruleset, inserted, "recent scores stored"),
                Err(e) => warn!(user_id = id, %ruleset, error = %e, "recent scores unavailable"),
            }
            if let Some(stats) = &user.statistics {
                self.ctx.store.record_stats(id, ruleset, stats).await?;
            }
            info!(user_id = id, username = %user.username, %ruleset, "user refreshed");
            latest = Some(user);
        }

        if let Some(user) = latest {
            self.ctx.store.update_user(&user).await?;
            self.ctx.reporter.stats_updated();
        }
        Ok(())
    }
}

/// Micro-batcher sink refreshing many users with one bulk call.
///
/// Ids missing from the response are restricted. If the whole call fails each id falls back
/// to the work queue on the default ruleset.
pub struct BatchUserRefresher {
    ctx: Arc<IngestContext>,
    queue: WorkQueue<u64>,
}

impl BatchUserRefresher {
    pub fn new(ctx: Arc<IngestContext>, queue: WorkQueue<u64>) -> Self {
        Self { ctx, queue }
    }

    fn bulk_path(ids: &[u64]) -> String {
        let ids = ids
            .iter()
            .map(|id| format!("ids[]={id}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("/users?include_variant_statistics=true&{ids}")
    }

    async fn refresh(&self, ids: &[u64]) -> Result<()> {
        let page: UsersPage = self.ctx.fetcher.fetch_json(&Self::bulk_path(ids)).await?;
        let mut by_id: HashMap<u64, User> = page.users.into_iter().map(|u| (u.id, u)).collect();

        for &id in ids {
            let Some(user) = by_id.remove(&id) else {
                self.queue.remove(id);
                retire(&self.ctx, id).await?;
                continue;
            };
            self.ctx.store.update_user(&user).await?;
            for (ruleset, stats) in user.ranked_statistics() {
                self.ctx.store.record_stats(id, ruleset, stats).await?;
            }
            self.ctx.reporter.stats_updated();
        }
        Ok(())
    }
}

#[async_trait]
impl BatchSink<u64> for BatchUserRefresher {
    async fn flush(&self, batch: Vec<u64>) {
        match self.refresh(&batch).await {
            Ok(()) => debug!(users = batch.len(), "bulk refresh done"),
            Err(e) => {
                warn!(users = batch.len(), error = %e, "bulk refresh failed, falling back to queue");
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    for id in batch {
                        if queue.enqueue(id, Ruleset::default().bit(), false).await.is_err() {
                            break;
                        }
                    }
                });
            }
        }
    }
}

/// Feed every known user into `batcher` once per `interval`, starting one interval from now.
pub async fn schedule_full_refresh(
    known: Arc<KnownUsers>,
    batcher: Arc<MicroBatcher<u64>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let ids = known.snapshot();
        info!(users = ids.len(), "scheduling full refresh");
        for id in ids {
            if batcher.add(id).await.is_err() {
                return;
            }
        }
    }
}
