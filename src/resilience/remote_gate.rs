//! Remote gate: the shared view of the upstream quota.
//!
//! Every outbound call waits here first. The gate is blocked either proactively, when the
//! quota headers report the remaining budget below the low-water mark, or forcibly after a
//! 429. While blocked, all callers park on a single [`Notify`] and are released together when
//! the block clears, either because its timer fired or because a later response reported the
//! quota recovered.

use reqwest::header::HeaderMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RemoteGateConfig {
    /// Block proactively once the reported remaining budget drops below this.
    pub low_water: u64,
    /// Estimated time until the upstream budget resets after a low-water block.
    #[serde(with = "crate::config::duration_secs")]
    pub reset_estimate: Duration,
    /// Block applied after an explicit 429.
    #[serde(with = "crate::config::duration_secs")]
    pub rate_limited_block: Duration,
}

impl Default for RemoteGateConfig {
    fn default() -> Self {
        Self {
            low_water: 100,
            reset_estimate: Duration::from_secs(60),
            rate_limited_block: Duration::from_secs(60 * 60),
        }
    }
}

impl RemoteGateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_low_water(mut self, low_water: u64) -> Self {
        self.low_water = low_water;
        self
    }

    pub fn with_reset_estimate(mut self, d: Duration) -> Self {
        self.reset_estimate = d;
        self
    }

    pub fn with_rate_limited_block(mut self, d: Duration) -> Self {
        self.rate_limited_block = d;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteGateSnapshot {
    pub blocked: bool,
    pub remaining: u64,
    pub max_observed_limit: u64,
    /// Time left on the current block (ms), if blocked.
    pub blocked_for_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct RemoteState {
    /// `None` until the first quota report arrives.
    remaining: Option<u64>,
    max_observed_limit: u64,
    blocked: bool,
    blocked_until: Option<Instant>,
    blocked_since: Option<Instant>,
    /// Bumped on every block/unblock so a stale timer can tell it lost the race.
    episode: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    cfg: RemoteGateConfig,
    state: Mutex<RemoteState>,
    unblocked: Notify,
}

/// Cloneable handle to the single shared remote rate state.
#[derive(Clone)]
pub struct RemoteGate {
    inner: Arc<Inner>,
}

impl RemoteGate {
    pub fn new(cfg: RemoteGateConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                state: Mutex::new(RemoteState::default()),
                unblocked: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &RemoteGateConfig {
        &self.inner.cfg
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the gate is open.
    pub async fn check(&self) {
        loop {
            // Register before inspecting state so a broadcast between the check and the
            // await is not lost.
            let notified = self.inner.unblocked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut st = self.lock();
                if !st.blocked {
                    return;
                }
                match st.blocked_until {
                    Some(until) if until <= Instant::now() => {
                        // The timer is about to fire; do not hold callers for it.
                        Self::clear_locked(&mut st);
                        drop(st);
                        self.inner.unblocked.notify_waiters();
                        return;
                    }
                    Some(until) => until.saturating_duration_since(Instant::now()),
                    None => Duration::ZERO,
                }
            };

            debug!(wait_ms = wait.as_millis() as u64, "remote gate blocked, waiting");
            notified.await;
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.lock().blocked
    }

    /// Feed the quota headers of a response to a request sent at `sent_at` into the gate.
    pub fn observe_headers(&self, headers: &HeaderMap, sent_at: Instant) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
        };
        if let (Some(limit), Some(remaining)) = (parse(LIMIT_HEADER), parse(REMAINING_HEADER)) {
            self.observe_at(limit, remaining, sent_at);
        }
    }

    /// Update the quota view from a `limit` / `remaining` pair reported just now.
    pub fn observe(&self, limit: u64, remaining: u64) {
        self.observe_at(limit, remaining, Instant::now());
    }

    /// Update the quota view from a `limit` / `remaining` pair carried by the response to a
    /// request sent at `sent_at`.
    ///
    /// The first report is the baseline and is checked against the low-water mark directly.
    /// A recovery only clears a block when its request was sent after the block began, so a
    /// slow response issued before a 429 cannot lift the block that 429 imposed.
    pub fn observe_at(&self, limit: u64, remaining: u64, sent_at: Instant) {
        let cfg = &self.inner.cfg;
        let mut st = self.lock();

        if st.max_observed_limit == 0 {
            st.max_observed_limit = limit;
        }
        if remaining > st.max_observed_limit {
            st.max_observed_limit = remaining;
        }

        if st.remaining.is_some_and(|prev| remaining > prev) {
            if remaining > st.max_observed_limit / 2 {
                if st.blocked && st.blocked_since.is_some_and(|since| sent_at < since) {
                    debug!(remaining, "recovery reported by a request older than the block, ignored");
                    return;
                }
                st.remaining = Some(remaining);
                let was_blocked = st.blocked;
                Self::clear_locked(&mut st);
                drop(st);
                if was_blocked {
                    info!(remaining, "remote quota recovered, releasing callers");
                }
                self.inner.unblocked.notify_waiters();
            }
            return;
        }

        st.remaining = Some(remaining);

        if remaining < cfg.low_water {
            warn!(
                remaining,
                low_water = cfg.low_water,
                block_secs = cfg.reset_estimate.as_secs(),
                "remote quota below low-water mark, blocking"
            );
            self.block_locked(&mut st, cfg.reset_estimate);
        }
    }

    /// Apply the long block that follows an explicit 429. Only a recovery reported by a request
    /// sent after this point lifts it early.
    pub fn on_rate_limited(&self) {
        let d = self.inner.cfg.rate_limited_block;
        warn!(block_secs = d.as_secs(), "received 429, blocking all callers");
        let mut st = self.lock();
        self.block_locked(&mut st, d);
    }

    /// Block for `d` from now. Never shortens a longer block already in force.
    pub fn block_for(&self, d: Duration) {
        let mut st = self.lock();
        self.block_locked(&mut st, d);
    }

    fn block_locked(&self, st: &mut RemoteState, d: Duration) {
        let until = Instant::now() + d;
        if st.blocked && st.blocked_until.map_or(false, |cur| cur >= until) {
            return;
        }

        st.blocked = true;
        st.blocked_until = Some(until);
        st.blocked_since = Some(Instant::now());
        st.episode += 1;
        if let Some(prev) = st.timer.take() {
            prev.abort();
        }

        let episode = st.episode;
        let gate = self.clone();
        st.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            let mut st = gate.lock();
            if st.episode != episode {
                return;
            }
            st.timer.take();
            Self::clear_locked(&mut st);
            drop(st);
            debug!("remote block expired");
            gate.inner.unblocked.notify_waiters();
        }));
    }

    fn clear_locked(st: &mut RemoteState) {
        st.blocked = false;
        st.blocked_until = None;
        st.blocked_since = None;
        st.episode += 1;
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
    }

    pub fn snapshot(&self) -> RemoteGateSnapshot {
        let st = self.lock();
        RemoteGateSnapshot {
            blocked: st.blocked,
            remaining: st.remaining.unwrap_or(0),
            max_observed_limit: st.max_observed_limit,
            blocked_for_ms: st
                .blocked_until
                .filter(|_| st.blocked)
                .map(|until| until.saturating_duration_since(Instant::now()).as_millis() as u64),
        }
    }
}
