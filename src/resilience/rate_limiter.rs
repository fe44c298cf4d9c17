use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub refill_per_sec: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

/// Token bucket settings as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Maximum burst size (tokens).
    #[serde(default)]
    pub bucket_size: u32,
    /// Tokens per second, fractional rates allowed.
    #[serde(default, rename = "refill_tokens_per_sec", alias = "refill_token_per_sec")]
    pub refill_per_sec: f64,
}

impl RateLimitConfig {
    pub fn new(bucket_size: u32, refill_per_sec: f64) -> Self {
        Self {
            enabled: true,
            bucket_size,
            refill_per_sec,
        }
    }

    /// Enabled with a usable bucket and refill rate.
    pub fn is_effective(&self) -> bool {
        self.enabled
            && self.bucket_size > 0
            && self.refill_per_sec.is_finite()
            && self.refill_per_sec > 0.0
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            bucket_size: 0,
            refill_per_sec: 0.0,
        }
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Why an admission wait ended without a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenied {
    /// The next token would arrive after the deadline.
    DeadlineExceeded,
    /// The caller's token was cancelled while waiting.
    Cancelled,
}

/// Token-bucket admission gate in front of one backend.
///
/// - `None` bucket means unlimited
/// - Waiters never sleep past their deadline
pub struct AdmissionLimiter {
    bucket: Option<(RateLimitConfig, Mutex<State>)>,
}

impl AdmissionLimiter {
    /// Build from configuration. Disabled or degenerate buckets admit everything;
    /// configuration validation rejects the degenerate ones before they get here.
    pub fn new(cfg: Option<RateLimitConfig>) -> Self {
        let bucket = cfg.filter(RateLimitConfig::is_effective).map(|c| {
            let state = Mutex::new(State {
                tokens: c.bucket_size as f64,
                last: Instant::now(),
            });
            (c, state)
        });
        Self { bucket }
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    fn refill_locked(cfg: &RateLimitConfig, st: &mut State, now: Instant) {
        let elapsed = now.saturating_duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.refill_per_sec).min(cfg.bucket_size as f64);
            st.last = now;
        }
    }

    /// Acquire one token, waiting at most until `deadline` or until `cancel` fires.
    pub async fn acquire(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), AdmissionDenied> {
        let Some((cfg, state)) = &self.bucket else {
            return Ok(());
        };

        loop {
            if cancel.is_cancelled() {
                return Err(AdmissionDenied::Cancelled);
            }

            let wait = {
                let mut st = state.lock().await;
                let now = Instant::now();
                Self::refill_locked(cfg, &mut st, now);

                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return Ok(());
                }

                let missing = 1.0 - st.tokens;
                let wait = Duration::from_secs_f64(missing / cfg.refill_per_sec);
                if now + wait > deadline {
                    return Err(AdmissionDenied::DeadlineExceeded);
                }
                wait
            };

            tracing::trace!(wait_ms = wait.as_millis() as u64, "waiting for rate limiter");
            tokio::select! {
                _ = cancel.cancelled() => return Err(AdmissionDenied::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Try to acquire a token without waiting, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let Some((cfg, state)) = &self.bucket else {
            return true;
        };
        let mut st = state.lock().await;
        Self::refill_locked(cfg, &mut st, Instant::now());
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> Option<RateLimiterSnapshot> {
        let (cfg, state) = self.bucket.as_ref()?;
        let mut st = state.lock().await;
        Self::refill_locked(cfg, &mut st, Instant::now());
        let estimated_wait_ms = (st.tokens < 1.0)
            .then(|| ((1.0 - st.tokens) / cfg.refill_per_sec * 1000.0) as u64);
        Some(RateLimiterSnapshot {
            refill_per_sec: cfg.refill_per_sec,
            burst: cfg.bucket_size as f64,
            tokens: st.tokens,
            estimated_wait_ms,
        })
    }
}

impl std::fmt::Debug for AdmissionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionLimiter")
            .field("config", &self.bucket.as_ref().map(|(c, _)| c))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let limiter = AdmissionLimiter::new(None);
        let token = CancellationToken::new();
        for _ in 0..100 {
            assert!(limiter.acquire(Instant::now(), &token).await.is_ok());
        }
        assert!(limiter.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_config_is_unlimited() {
        let limiter = AdmissionLimiter::new(Some(RateLimitConfig::disabled()));
        assert!(!limiter.is_limited());
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_burst() {
        let limiter = AdmissionLimiter::new(Some(RateLimitConfig::new(3, 1.0)));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_bucket_past_deadline_fails_immediately() {
        let limiter = AdmissionLimiter::new(Some(RateLimitConfig::new(1, 0.1)));
        let token = CancellationToken::new();
        assert!(limiter.acquire(far(), &token).await.is_ok());

        let start = Instant::now();
        let res = limiter.acquire(Instant::now(), &token).await;
        assert_eq!(res, Err(AdmissionDenied::DeadlineExceeded));
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_refill() {
        let limiter = AdmissionLimiter::new(Some(RateLimitConfig::new(1, 2.0)));
        let token = CancellationToken::new();
        assert!(limiter.acquire(far(), &token).await.is_ok());

        let start = Instant::now();
        assert!(limiter.acquire(far(), &token).await.is_ok());
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_millis(499), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(600), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let limiter = AdmissionLimiter::new(Some(RateLimitConfig::new(1, 0.01)));
        let token = CancellationToken::new();
        assert!(limiter.acquire(far(), &token).await.is_ok());

        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });
        let res = limiter.acquire(far(), &token).await;
        assert_eq!(res, Err(AdmissionDenied::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_wait() {
        let limiter = AdmissionLimiter::new(Some(RateLimitConfig::new(2, 4.0)));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        let snap = limiter.snapshot().await.unwrap();
        assert_eq!(snap.burst, 2.0);
        assert_eq!(snap.refill_per_sec, 4.0);
        assert!(snap.estimated_wait_ms.is_some());
    }
}
