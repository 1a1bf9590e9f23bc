//! quota-ingest: polls the score feed and keeps player records fresh within the API quota.
//!
//! Usage:
//!   quota-ingest [config.yaml]
//!
//! Without a file, configuration comes from the environment (see `IngestConfig::from_env`).

use anyhow::Context;
use quota_ingest::batch::MicroBatcher;
use quota_ingest::cache::TtlCache;
use quota_ingest::client::Fetcher;
use quota_ingest::config::IngestConfig;
use quota_ingest::ingest::{
    self, schedule_full_refresh, BatchUserRefresher, CursorFile, IngestContext, KnownUsers,
    MemoryStore, ScoreIngestor, StatsReporter, UserRefresher,
};
use quota_ingest::queue::WorkQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_LOGIN_BACKOFF: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = match std::env::args().nth(1) {
        Some(path) => IngestConfig::from_yaml_file(&path)
            .await
            .with_context(|| format!("loading {path}"))?,
        None => IngestConfig::from_env(),
    };
    cfg.validate()?;

    let shutdown = CancellationToken::new();
    let fetcher = Fetcher::from_config(&cfg).await?;
    login(&fetcher, &shutdown).await?;

    let seen_scores = Arc::new(TtlCache::new(cfg.score_cache_ttl));
    let reporter = Arc::new(StatsReporter::new());
    let ctx = Arc::new(IngestContext {
        fetcher: fetcher.clone(),
        store: Arc::new(MemoryStore::new()),
        known: Arc::new(KnownUsers::new()),
        seen_scores: seen_scores.clone(),
        reporter: reporter.clone(),
        include_failed: cfg.include_failed,
        dump_dir: cfg.dump_dir.clone(),
    });

    let queue = WorkQueue::new(&cfg.queue, UserRefresher::new(ctx.clone()));
    queue.start(shutdown.clone())?;
    queue.run_workers(cfg.queue.workers);

    let batcher = Arc::new(MicroBatcher::new(
        cfg.refresh_batch.clone(),
        BatchUserRefresher::new(ctx.clone(), queue.clone()),
    ));
    batcher.start(shutdown.clone())?;

    seen_scores.spawn_sweeper(shutdown.clone());
    reporter.spawn_hourly(
        fetcher.client().http().clone(),
        cfg.stats_webhook.clone(),
        shutdown.clone(),
    );

    ingest::restore(&ctx, &queue).await?;
    tokio::spawn(schedule_full_refresh(
        ctx.known.clone(),
        batcher,
        cfg.full_refresh_interval,
        shutdown.clone(),
    ));

    let ingestor = ScoreIngestor::new(
        ctx.clone(),
        queue.clone(),
        CursorFile::new(&cfg.cursor_file),
        cfg.max_inflight,
    )
    .await?;

    info!(
        api = %cfg.api_base_url,
        rps = cfg.rate_limit.rps,
        workers = cfg.queue.workers,
        proxies = cfg.enable_proxy,
        "quota-ingest started"
    );

    let outcome = tokio::select! {
        res = ingestor.run(cfg.poll_interval, shutdown.clone()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        }
    };
    shutdown.cancel();
    outcome?;
    Ok(())
}

/// Obtain the first credential. Rejected credentials end the process; anything else is
/// retried with exponential backoff.
async fn login(fetcher: &Fetcher, shutdown: &CancellationToken) -> anyhow::Result<()> {
    let mut backoff = Duration::from_secs(1);
    loop {
        match fetcher.credentials().get().await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_fatal() => return Err(e).context("credential exchange rejected"),
            Err(e) => {
                warn!(error = %e, retry_in_secs = backoff.as_secs(), "login failed, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => anyhow::bail!("shut down before login succeeded"),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_LOGIN_BACKOFF);
            }
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
