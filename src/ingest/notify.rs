//! Hourly ingest statistics pushed to a chat webhook.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POST_INTERVAL: Duration = Duration::from_secs(3);
const REPORT_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub scores_stored: u64,
    pub stats_updated: u64,
    pub users_tracked: u64,
}

/// Counters shared by the ingest loop and the refresh handlers.
#[derive(Debug, Default)]
pub struct StatsReporter {
    scores_stored: AtomicU64,
    stats_updated: AtomicU64,
    users_tracked: AtomicU64,
}

impl StatsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score_stored(&self) {
        self.scores_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats_updated(&self) {
        self.stats_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_users_tracked(&self, n: usize) {
        self.users_tracked.store(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsReport {
        StatsReport {
            scores_stored: self.scores_stored.load(Ordering::Relaxed),
            stats_updated: self.stats_updated.load(Ordering::Relaxed),
            users_tracked: self.users_tracked.load(Ordering::Relaxed),
        }
    }

    /// Read and reset the per-period counters. `users_tracked` is a gauge and is kept.
    pub fn take(&self) -> StatsReport {
        StatsReport {
            scores_stored: self.scores_stored.swap(0, Ordering::Relaxed),
            stats_updated: self.stats_updated.swap(0, Ordering::Relaxed),
            users_tracked: self.users_tracked.load(Ordering::Relaxed),
        }
    }

    /// Post a report at the top of every hour until `shutdown`. A missing URL disables posting
    /// but the counters still reset hourly.
    pub fn spawn_hourly(
        self: &Arc<Self>,
        http: reqwest::Client,
        url: Option<String>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let webhook = WebhookWorker::spawn(http, url, shutdown.clone());
        let reporter = self.clone();
        tokio::spawn(async move {
            let first = tokio::time::Instant::now() + until_next_hour(Utc::now());
            let mut ticker = tokio::time::interval_at(first, REPORT_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let report = reporter.take();
                debug!(?report, "hourly stats");
                webhook.queue(report_payload(&report, Utc::now())).await;
            }
        })
    }
}

fn until_next_hour(now: DateTime<Utc>) -> Duration {
    now.duration_trunc(TimeDelta::hours(1))
        .ok()
        .map(|hour| hour + TimeDelta::hours(1) - now)
        .and_then(|d| d.to_std().ok())
        .unwrap_or(REPORT_INTERVAL)
}

/// Discord-style embed body for one report.
pub fn report_payload(report: &StatsReport, at: DateTime<Utc>) -> Value {
    json!({
        "username": "quota-ingest",
        "embeds": [{
            "title": "Update Stats",
            "color": 0x86DC3D,
            "timestamp": at.to_rfc3339(),
            "footer": { "text": format!("Users tracked: {}", report.users_tracked) },
            "fields": [
                { "name": "Scores Stored", "value": report.scores_stored.to_string(), "inline": true },
                { "name": "Stats Updated", "value": report.stats_updated.to_string(), "inline": true },
            ],
        }],
    })
}

/// Best-effort webhook sender that posts at most once per [`POST_INTERVAL`].
#[derive(Clone)]
pub struct WebhookWorker {
    tx: Option<mpsc::Sender<Value>>,
}

impl WebhookWorker {
    pub fn spawn(http: reqwest::Client, url: Option<String>, shutdown: CancellationToken) -> Self {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return Self { tx: None };
        };
        let (tx, mut rx) = mpsc::channel::<Value>(16);
        tokio::spawn(async move {
            let mut pace = tokio::time::interval(POST_INTERVAL);
            loop {
                let payload = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    p = rx.recv() => match p {
                        Some(p) => p,
                        None => break,
                    },
                };
                pace.tick().await;
                match http.post(&url).json(&payload).send().await {
                    Ok(resp) if resp.status().is_success() => debug!("webhook delivered"),
                    Ok(resp) => warn!(http_status = resp.status().as_u16(), "webhook rejected"),
                    Err(e) => warn!(error = %e, "webhook unreachable"),
                }
            }
        });
        Self { tx: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub async fn queue(&self, payload: Value) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(payload).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_take_resets_counters_but_not_gauge() {
        let reporter = StatsReporter::new();
        reporter.score_stored();
        reporter.score_stored();
        reporter.stats_updated();
        reporter.set_users_tracked(42);

        assert_eq!(
            reporter.take(),
            StatsReport {
                scores_stored: 2,
                stats_updated: 1,
                users_tracked: 42
            }
        );
        assert_eq!(reporter.snapshot().scores_stored, 0);
        assert_eq!(reporter.snapshot().users_tracked, 42);
    }

    #[test]
    fn test_payload_shape() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let body = report_payload(
            &StatsReport {
                scores_stored: 9,
                stats_updated: 3,
                users_tracked: 100,
            },
            at,
        );
        let embed = &body["embeds"][0];
        assert_eq!(embed["fields"][0]["value"], "9");
        assert_eq!(embed["fields"][1]["value"], "3");
        assert_eq!(embed["footer"]["text"], "Users tracked: 100");
    }

    #[test]
    fn test_until_next_hour() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 45, 30).unwrap();
        assert_eq!(until_next_hour(now), Duration::from_secs(14 * 60 + 30));
    }

    #[tokio::test]
    async fn test_empty_url_disables_worker() {
        let worker = WebhookWorker::spawn(reqwest::Client::new(), Some(String::new()), CancellationToken::new());
        assert!(!worker.is_enabled());
        worker.queue(json!({})).await;
    }
}
