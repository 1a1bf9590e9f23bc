use super::mask::OpMask;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub normal_lane: usize,
    pub priority_lane: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            normal_lane: 512,
            priority_lane: 256,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_lanes(mut self, normal: usize, priority: usize) -> Self {
        self.normal_lane = normal;
        self.priority_lane = priority;
        self
    }
}

/// Work performed for one id. `mask` is never empty.
#[async_trait]
pub trait DispatchHandler<Id>: Send + Sync {
    async fn handle(&self, id: Id, mask: OpMask) -> Result<()>;
}

#[async_trait]
impl<Id, F, Fut> DispatchHandler<Id> for F
where
    Id: Send + 'static,
    F: Fn(Id, OpMask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, id: Id, mask: OpMask) -> Result<()> {
        (self)(id, mask).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub normal_depth: usize,
    pub priority_depth: usize,
    pub busy_workers: usize,
    pub workers: usize,
}

struct Lanes<Id> {
    normal: mpsc::Receiver<Id>,
    priority: mpsc::Receiver<Id>,
}

struct Shared<Id> {
    pending: Mutex<HashMap<Id, OpMask>>,
    normal_tx: mpsc::Sender<Id>,
    priority_tx: mpsc::Sender<Id>,
    lanes: Mutex<Option<Lanes<Id>>>,
    handler: Arc<dyn DispatchHandler<Id>>,
    slots: Arc<Semaphore>,
    workers: Mutex<usize>,
}

/// Deduplicating two-lane work queue.
///
/// Each id appears in the pending map at most once, carrying the union of every mask enqueued
/// for it since it was last dispatched. An id is pushed onto a lane only when its pending mask
/// goes from empty to non-empty, so repeated enqueues merge instead of multiplying work.
///
/// The dispatcher takes a free worker slot first and only then picks the next id, always
/// preferring the priority lane. A failed handler ORs its mask back and requeues the id with
/// priority.
pub struct WorkQueue<Id> {
    shared: Arc<Shared<Id>>,
}

impl<Id> Clone for WorkQueue<Id> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<Id> WorkQueue<Id>
where
    Id: Copy + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(cfg: &QueueConfig, handler: impl DispatchHandler<Id> + 'static) -> Self {
        Self::with_handler(cfg, Arc::new(handler))
    }

    pub fn with_handler(cfg: &QueueConfig, handler: Arc<dyn DispatchHandler<Id>>) -> Self {
        let (normal_tx, normal) = mpsc::channel(cfg.normal_lane.max(1));
        let (priority_tx, priority) = mpsc::channel(cfg.priority_lane.max(1));
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                normal_tx,
                priority_tx,
                lanes: Mutex::new(Some(Lanes { normal, priority })),
                handler,
                slots: Arc::new(Semaphore::new(0)),
                workers: Mutex::new(0),
            }),
        }
    }

    /// Merge `mask` into the pending entry for `id`, pushing `id` onto a lane if it had none.
    ///
    /// Waits when the lane is full. Fails only once the dispatcher has shut down.
    pub async fn enqueue(&self, id: Id, mask: OpMask, priority: bool) -> Result<()> {
        if mask.is_empty() {
            return Ok(());
        }
        let first = {
            let mut pending = lock(&self.shared.pending);
            let entry = pending.entry(id).or_default();
            let first = entry.is_empty();
            *entry |= mask;
            first
        };
        if !first {
            trace!(?id, %mask, "merged into pending entry");
            return Ok(());
        }

        let lane = if priority {
            &self.shared.priority_tx
        } else {
            &self.shared.normal_tx
        };
        lane.send(id)
            .await
            .map_err(|_| Error::runtime("work queue is shut down"))
    }

    /// Drop all pending work for `id`. A lane entry may remain and is skipped on dispatch.
    pub fn remove(&self, id: Id) -> Option<OpMask> {
        lock(&self.shared.pending).remove(&id)
    }

    pub fn pending(&self, id: Id) -> OpMask {
        lock(&self.shared.pending)
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    /// Add `n` worker slots. Ids are dispatched only while a slot is free.
    pub fn run_workers(&self, n: usize) {
        *lock(&self.shared.workers) += n;
        self.shared.slots.add_permits(n);
        debug!(added = n, "work queue workers started");
    }

    /// Spawn the dispatch loop. Returns an error if it is already running.
    pub fn start(&self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let lanes = lock(&self.shared.lanes)
            .take()
            .ok_or_else(|| Error::runtime("work queue dispatcher already started"))?;
        let shared = self.shared.clone();
        Ok(tokio::spawn(shared.dispatch(lanes, shutdown)))
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let tx = &self.shared;
        let workers = *lock(&tx.workers);
        QueueSnapshot {
            pending: lock(&tx.pending).len(),
            normal_depth: tx.normal_tx.max_capacity() - tx.normal_tx.capacity(),
            priority_depth: tx.priority_tx.max_capacity() - tx.priority_tx.capacity(),
            busy_workers: workers.saturating_sub(tx.slots.available_permits()),
            workers,
        }
    }
}

impl<Id> Shared<Id>
where
    Id: Copy + Eq + Hash + Debug + Send + Sync + 'static,
{
    async fn dispatch(self: Arc<Self>, mut lanes: Lanes<Id>, shutdown: CancellationToken) {
        loop {
            let slot = tokio::select! {
                _ = shutdown.cancelled() => break,
                slot = self.slots.clone().acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            let id = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(id) = lanes.priority.recv() => id,
                Some(id) = lanes.normal.recv() => id,
                else => break,
            };

            tokio::spawn(self.clone().work(id, slot));
        }
        debug!("work queue dispatcher stopped");
    }

    async fn work(self: Arc<Self>, id: Id, slot: OwnedSemaphorePermit) {
        let mask = lock(&self.pending).remove(&id).unwrap_or_default();
        if mask.is_empty() {
            trace!(?id, "nothing pending, skipping");
            return;
        }

        // A panicking handler must not take the mask down with it.
        let outcome = AssertUnwindSafe(self.handler.handle(id, mask))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => trace!(?id, %mask, "dispatched"),
            Ok(Err(e)) => {
                warn!(?id, %mask, error = %e, "work failed, requeueing with priority");
                self.requeue(id, mask);
            }
            Err(panic) => {
                let panic = panic_message(&*panic);
                warn!(?id, %mask, panic, "work panicked, requeueing with priority");
                self.requeue(id, mask);
            }
        }
        drop(slot);
    }

    /// Always pushes to the priority lane, even if `id` is already queued elsewhere; the later
    /// copy finds an empty mask and is skipped.
    fn requeue(&self, id: Id, mask: OpMask) {
        *lock(&self.pending).entry(id).or_default() |= mask;
        match self.priority_tx.try_send(id) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(id)) => {
                let tx = self.priority_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(id).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
