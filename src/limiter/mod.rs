//! Per-client token-bucket admission control
//!
//! Buckets are created lazily on the first request from a key and start at
//! full burst. A background timer clears the whole map once it grows past a
//! threshold; keys seen afterwards simply rebuild their buckets, which makes
//! admission briefly more permissive right after a clear.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Token bucket state for one client key
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32, now: Instant) -> Self {
        let burst = f64::from(burst);
        Self {
            rate,
            burst,
            tokens: burst,
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last check, then take one token.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        self.last_refill = self.last_refill.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Keyed rate limiter shared by every request handler
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
    rate: f64,
    burst: u32,
}

impl RateLimiter {
    /// `rate` tokens per second, at most `burst` tokens stored
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            rate,
            burst,
        }
    }

    /// Whether a request from `key` is admitted right now
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        if let Some(bucket) = self.buckets.get(key) {
            let admitted = bucket.lock().try_acquire(now);
            return admitted;
        }

        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.rate, self.burst, now)));
        let admitted = bucket.lock().try_acquire(now);
        admitted
    }

    /// Number of client keys currently tracked
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every bucket if more than `max_keys` are tracked.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_if_over(&self, max_keys: usize) -> usize {
        let count = self.buckets.len();
        if count <= max_keys {
            return 0;
        }

        info!(count, max_keys, "Cleaning up rate limiter map");
        self.buckets.clear();
        count
    }

    /// Start the eviction timer.
    ///
    /// The task stops when `shutdown` flips to `true`.
    pub fn start_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        max_keys: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.evict_if_over(max_keys);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Rate limiter cleanup task stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_of_one_denies_immediate_second_request() {
        let limiter = RateLimiter::new(1.0, 1);
        let start = Instant::now();

        assert!(limiter.admit_at("192.0.2.1", start));
        assert!(!limiter.admit_at("192.0.2.1", start));
        assert!(limiter.admit_at("192.0.2.1", start + Duration::from_secs(1)));
    }

    #[test]
    fn test_admit_with_real_clock() {
        let limiter = RateLimiter::new(1.0, 1);

        assert!(limiter.admit("client"));
        assert!(!limiter.admit("client"));
        std::thread::sleep(Duration::from_millis(1050));
        assert!(limiter.admit("client"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1.0, 1);
        let now = Instant::now();

        assert!(limiter.admit_at("a", now));
        assert!(!limiter.admit_at("a", now));
        assert!(limiter.admit_at("b", now));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_refill_is_capped_at_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 3, start);

        // A long idle period must not accumulate more than `burst` tokens
        let later = start + Duration::from_secs(3600);
        assert!(bucket.try_acquire(later));
        assert!(bucket.tokens() <= 2.0 + f64::EPSILON);
        assert!(bucket.try_acquire(later));
        assert!(bucket.try_acquire(later));
        assert!(!bucket.try_acquire(later));
        assert!(bucket.tokens() >= 0.0);
    }

    #[test]
    fn test_partial_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 1, start);

        assert!(bucket.try_acquire(start));
        assert!(!bucket.try_acquire(start + Duration::from_millis(250)));
        assert!(bucket.try_acquire(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_evict_only_above_threshold() {
        let limiter = RateLimiter::new(1.0, 1);
        for i in 0..10 {
            limiter.admit(&format!("ip-{i}"));
        }

        assert_eq!(limiter.evict_if_over(10), 0);
        assert_eq!(limiter.len(), 10);

        limiter.admit("ip-10");
        assert_eq!(limiter.evict_if_over(10), 11);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_fresh_bucket_after_clear_starts_full() {
        let limiter = RateLimiter::new(1.0, 1);
        let now = Instant::now();

        assert!(limiter.admit_at("client", now));
        assert!(!limiter.admit_at("client", now));

        limiter.evict_if_over(0);
        assert!(limiter.admit_at("client", now));
    }

    #[test]
    fn test_concurrent_admissions_respect_burst() {
        let limiter = Arc::new(RateLimiter::new(0.001, 50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..20).filter(|_| limiter.admit("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[tokio::test]
    async fn test_cleanup_task_clears_and_stops() {
        let limiter = Arc::new(RateLimiter::new(1.0, 1));
        for i in 0..5 {
            limiter.admit(&format!("ip-{i}"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = limiter.start_cleanup_task(Duration::from_millis(10), 3, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task should stop")
            .unwrap();
    }
}
