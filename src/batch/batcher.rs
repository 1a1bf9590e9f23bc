use super::collector::BatchCollector;
use crate::config::duration_secs;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    pub batch_size: usize,
    /// Flush a partial batch once this long has passed since the previous flush.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Minimum time between the starts of two flushes.
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    pub intake_capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            timeout: Duration::from_secs(60),
            cooldown: Duration::from_secs(1),
            intake_capacity: 2000,
        }
    }
}

impl BatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_intake_capacity(mut self, n: usize) -> Self {
        self.intake_capacity = n;
        self
    }
}

/// Receives each flushed batch. Partial failures are the sink's own business.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn flush(&self, batch: Vec<T>);
}

#[async_trait]
impl<T, F, Fut> BatchSink<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn flush(&self, batch: Vec<T>) {
        (self)(batch).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherSnapshot {
    pub buffered: usize,
    pub intake_depth: usize,
}

struct Staging<T> {
    collector: BatchCollector<T>,
    full: Notify,
}

/// Size/time dual-trigger batcher with a cooldown floor between flushes.
///
/// Producers push through a bounded intake channel; an intake task moves items into the staging
/// buffer and wakes the flush task when a full batch is waiting. The flush task alone owns the
/// timeout deadline, so a flush and the rearm that follows it cannot interleave with a stale
/// timer.
pub struct MicroBatcher<T> {
    cfg: BatcherConfig,
    tx: mpsc::Sender<T>,
    staging: Arc<Staging<T>>,
    idle: Mutex<Option<(mpsc::Receiver<T>, Arc<dyn BatchSink<T>>)>>,
}

impl<T: Send + 'static> MicroBatcher<T> {
    pub fn new(cfg: BatcherConfig, sink: impl BatchSink<T> + 'static) -> Self {
        Self::with_sink(cfg, Arc::new(sink))
    }

    pub fn with_sink(cfg: BatcherConfig, sink: Arc<dyn BatchSink<T>>) -> Self {
        let (tx, rx) = mpsc::channel(cfg.intake_capacity.max(1));
        Self {
            staging: Arc::new(Staging {
                collector: BatchCollector::new(cfg.batch_size),
                full: Notify::new(),
            }),
            cfg,
            tx,
            idle: Mutex::new(Some((rx, sink))),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.cfg
    }

    /// Queue one item. Waits while the intake channel is full.
    pub async fn add(&self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| Error::runtime("batcher is shut down"))
    }

    /// Start with the configured cooldown.
    pub fn start(&self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        self.start_with_cooldown(self.cfg.cooldown, shutdown)
    }

    pub fn start_with_cooldown(
        &self,
        cooldown: Duration,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let (rx, sink) = self
            .idle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| Error::runtime("batcher already started"))?;

        tokio::spawn(intake(rx, self.staging.clone(), shutdown.clone()));
        let flusher = Flusher {
            staging: self.staging.clone(),
            sink,
            timeout: self.cfg.timeout,
            cooldown,
        };
        Ok(tokio::spawn(flusher.run(shutdown)))
    }

    pub fn snapshot(&self) -> BatcherSnapshot {
        BatcherSnapshot {
            buffered: self.staging.collector.len(),
            intake_depth: self.tx.max_capacity() - self.tx.capacity(),
        }
    }
}

async fn intake<T>(mut rx: mpsc::Receiver<T>, staging: Arc<Staging<T>>, shutdown: CancellationToken) {
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        if staging.collector.add(item).should_flush() {
            staging.full.notify_one();
        }
    }
}

struct Flusher<T> {
    staging: Arc<Staging<T>>,
    sink: Arc<dyn BatchSink<T>>,
    timeout: Duration,
    cooldown: Duration,
}

impl<T: Send + 'static> Flusher<T> {
    async fn run(self, shutdown: CancellationToken) {
        let collector = &self.staging.collector;
        let mut deadline = Instant::now() + self.timeout;
        let mut last_start: Option<Instant> = None;

        loop {
            if !collector.should_flush() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.staging.full.notified() => {
                        if !collector.should_flush() {
                            continue;
                        }
                    }
                    _ = sleep_until(deadline) => {}
                }
            }

            let batch = collector.drain_batch();
            if !batch.is_empty() {
                if let Some(prev) = last_start {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            warn!(dropped = batch.len(), "batcher stopped during cooldown");
                            break;
                        }
                        _ = sleep_until(prev + self.cooldown) => {}
                    }
                }
                last_start = Some(Instant::now());
                debug!(items = batch.len(), "flushing batch");
                self.sink.flush(batch).await;
            }
            deadline = Instant::now() + self.timeout;
        }

        let left = collector.len();
        if left > 0 {
            warn!(unflushed = left, "batcher stopped with buffered items");
        }
    }
}
