use super::cursor::CursorFile;
use super::records::{Score, ScoresPage};
use super::IngestContext;
use crate::batch::BatchExecutor;
use crate::queue::WorkQueue;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one poll of the score feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub scores: usize,
    pub inserted: usize,
    pub new_users: usize,
    pub failed: usize,
    pub cursor_advanced: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct ScoreOutcome {
    new_user: bool,
    inserted: bool,
}

/// Polls the global score feed and hands every player to the work queue.
pub struct ScoreIngestor {
    ctx: Arc<IngestContext>,
    queue: WorkQueue<u64>,
    cursor_file: CursorFile,
    cursor: Mutex<String>,
    executor: BatchExecutor,
}

impl ScoreIngestor {
    /// `max_concurrency` caps the per-score fan-out of one page.
    pub async fn new(
        ctx: Arc<IngestContext>,
        queue: WorkQueue<u64>,
        cursor_file: CursorFile,
        max_concurrency: usize,
    ) -> Result<Self> {
        let cursor = cursor_file.load().await?;
        Ok(Self {
            ctx,
            queue,
            cursor_file,
            cursor: Mutex::new(cursor),
            executor: BatchExecutor::new(max_concurrency),
        })
    }

    pub async fn cursor(&self) -> String {
        self.cursor.lock().await.clone()
    }

    async fn ingest_score(&self, score: Score) -> Result<ScoreOutcome> {
        let Some(ruleset) = score.ruleset() else {
            return Err(Error::runtime(format!(
                "score {} has unknown ruleset {}",
                score.id, score.ruleset_id
            )));
        };

        let mut outcome = ScoreOutcome::default();
        if !self.ctx.known.contains(score.user_id) {
            self.ctx.store.create_user(score.user_id).await?;
            outcome.new_user = self.ctx.known.insert(score.user_id);
        }
        // New players jump the line so their history is captured early.
        self.queue
            .enqueue(score.user_id, ruleset.bit(), outcome.new_user)
            .await?;
        outcome.inserted = self.ctx.remember_score(&score).await?;
        Ok(outcome)
    }

    /// Fetch one page after the current cursor, store it and queue its players.
    ///
    /// The cursor only advances once every score on the page has been handled. An undecodable
    /// page is dumped to disk and reported as [`Error::Decode`] without moving the cursor.
    pub async fn poll_once(&self) -> Result<IngestReport> {
        let started = Instant::now();
        let mut cursor = self.cursor.lock().await;
        let encoded: String = url::form_urlencoded::byte_serialize(cursor.as_bytes()).collect();
        let path = format!("/scores?cursor_string={encoded}");

        let page: ScoresPage = match self.ctx.fetcher.fetch_json(&path).await {
            Ok(page) => page,
            Err(Error::Decode { source, payload }) => {
                warn!(bytes = payload.len(), error = %source, "undecodable score page, skipping cycle");
                self.ctx.dump_payload(&payload, &source.to_string()).await;
                return Err(Error::decode(source, payload));
            }
            Err(e) => return Err(e),
        };

        let mut report = IngestReport {
            scores: page.scores.len(),
            ..Default::default()
        };
        if page.scores.is_empty() {
            return Ok(report);
        }

        let result = self
            .executor
            .execute_concurrent(page.scores, |score| self.ingest_score(score))
            .await;
        for (_, outcome) in &result.successes {
            report.inserted += usize::from(outcome.inserted);
            report.new_users += usize::from(outcome.new_user);
        }
        for (i, e) in &result.failures {
            warn!(index = i, error = %e, "score not ingested");
        }
        report.failed = result.failure_count();
        self.ctx.reporter.set_users_tracked(self.ctx.known.len());

        if let Some(next) = page.cursor_string {
            self.cursor_file.save(&next).await?;
            *cursor = next;
            report.cursor_advanced = true;
        }

        let signals = self.ctx.fetcher.client().signals().await;
        let queue = self.queue.snapshot();
        info!(
            scores = report.scores,
            inserted = report.inserted,
            new_users = report.new_users,
            failed = report.failed,
            known_users = self.ctx.known.len(),
            remaining = signals.remote.remaining,
            normal_depth = queue.normal_depth,
            priority_depth = queue.priority_depth,
            pending = queue.pending,
            duration_ms = started.elapsed().as_millis() as u64,
            "ingest cycle"
        );
        Ok(report)
    }

    /// Poll now and then every `interval` until `shutdown`. Only fatal errors end the loop.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            match self.poll_once().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "ingest cycle failed"),
            }
        }
    }
}
