use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub rps: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Tokens per second.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
}

impl RateLimiterConfig {
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: rps.max(1.0), // bucket holds one second worth, at least 1
        })
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Steady-rate token bucket: the local gate every outbound call passes.
///
/// Over any window of `W` seconds at most `rps * W + burst` acquisitions succeed.
/// A zero rate disables the gate.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let burst = cfg.burst;
        let state = Mutex::new(State {
            tokens: burst,
            last: Instant::now(),
        });
        Self { cfg, state }
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst);
            st.last = now;
        }
    }

    /// Acquire one token, sleeping until the bucket refills if needed.
    pub async fn acquire(&self) {
        let cfg = &self.cfg;
        if cfg.rps <= 0.0 {
            return;
        }

        loop {
            let wait_duration = {
                let mut st = self.state.lock().await;
                Self::refill_locked(cfg, &mut st);

                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return;
                }

                let missing = 1.0 - st.tokens;
                Duration::from_secs_f64(missing / cfg.rps)
            };

            tracing::trace!(wait_ms = wait_duration.as_millis() as u64, "local gate waiting for token");
            tokio::time::sleep(wait_duration).await;
        }
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;

        let mut wait_ms = None;
        if cfg.rps > 0.0 {
            Self::refill_locked(cfg, &mut st);
            if st.tokens < 1.0 {
                let missing = 1.0 - st.tokens;
                wait_ms = Some((missing / cfg.rps * 1000.0) as u64);
            }
        }

        RateLimiterSnapshot {
            rps: cfg.rps,
            burst: cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms: wait_ms,
        }
    }

    /// Try to acquire a token without waiting, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let cfg = &self.cfg;
        if cfg.rps <= 0.0 {
            return true;
        }

        let mut st = self.state.lock().await;
        Self::refill_locked(cfg, &mut st);

        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl RateLimiterConfig {
    /// Create a new config with default values (5 requests per second)
    pub fn new() -> Self {
        Self { rps: 5.0, burst: 5.0 }
    }

    /// Set the maximum tokens (burst size)
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.burst = tokens as f64;
        self
    }

    /// Set the refill rate (tokens per second)
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rps = rate;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_from_rps_sizes_burst_to_one_second() {
        let cfg = RateLimiterConfig::from_rps(20.0).unwrap();
        assert_eq!((cfg.rps, cfg.burst), (20.0, 20.0));

        let slow = RateLimiterConfig::from_rps(0.2).unwrap();
        assert_eq!(slow.burst, 1.0);

        for bad in [-0.5, f64::NAN, f64::NEG_INFINITY] {
            assert!(RateLimiterConfig::from_rps(bad).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_bucket_reports_wait() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_tokens(2)
                .with_refill_rate(4.0),
        );

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        let snap = limiter.snapshot().await;
        assert_eq!(snap.estimated_wait_ms, Some(250));
    }

    #[tokio::test]
    async fn test_rate_limiter_zero_rps() {
        let config = RateLimiterConfig::from_rps(0.0).unwrap();
        let limiter = RateLimiter::new(config);

        // Zero RPS means unlimited
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_refill() {
        let config = RateLimiterConfig::from_rps(5.0).unwrap();
        let limiter = RateLimiter::new(config);

        for _ in 0..5 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        // 5 rps = 1 token per 200ms
        tokio::time::advance(Duration::from_millis(210)).await;
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_is_bounded_by_rate_plus_burst() {
        let rate = 10.0;
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::from_rps(rate).unwrap()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut passed = Vec::new();
                for _ in 0..15 {
                    limiter.acquire().await;
                    passed.push(Instant::now());
                }
                passed
            }));
        }

        let mut passed = Vec::new();
        for h in handles {
            passed.extend(h.await.unwrap());
        }
        passed.sort();
        assert_eq!(passed.len(), 60);

        for window_secs in [1u64, 2, 3] {
            let window = Duration::from_secs(window_secs);
            let bound = (rate * window_secs as f64 + rate) as usize;
            for (i, start) in passed.iter().enumerate() {
                let in_window = passed[i..]
                    .iter()
                    .take_while(|t| t.duration_since(*start) < window)
                    .count();
                assert!(
                    in_window <= bound,
                    "{in_window} calls passed within {window_secs}s (bound {bound})"
                );
            }
        }
    }
}
