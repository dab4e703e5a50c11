use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-queue token bucket. Simpler than a full distributed rate limiter
/// (there is exactly one instance of this process per named queue, not one
/// per request key) but built on the same `tokio::sync::Mutex`-guarded
/// refill idiom: waiting for the lock yields back to the runtime instead of
/// blocking a worker thread.
struct Bucket {
    inner: Mutex<BucketInner>,
}

struct BucketInner {
    tokens: f64,
    last_refill: tokio::time::Instant,
    rate_per_sec: f64,
    max_tokens: f64,
}

impl Bucket {
    fn new(rate_per_sec: f64) -> Self {
        Self {
            inner: Mutex::new(BucketInner {
                tokens: rate_per_sec,
                last_refill: tokio::time::Instant::now(),
                rate_per_sec,
                max_tokens: rate_per_sec,
            }),
        }
    }

    /// Maximum time a caller will wait for a token before being rejected outright.
    const MAX_WAIT: std::time::Duration = std::time::Duration::from_secs(5);

    /// Blocks until a token is available, refilling proportionally to elapsed
    /// time. Returns `false` without waiting if the current backlog would
    /// require more than `MAX_WAIT` before a token frees up.
    async fn acquire(&self) -> bool {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                let now = tokio::time::Instant::now();
                let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
                inner.last_refill = now;
                inner.tokens = (inner.tokens + elapsed * inner.rate_per_sec).min(inner.max_tokens);

                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - inner.tokens;
                    Some(std::time::Duration::from_secs_f64(deficit / inner.rate_per_sec))
                }
            };

            match wait {
                None => return true,
                Some(d) if d > Self::MAX_WAIT => return false,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// Named-queue rate caps: `queue_syncer_job`, `queue_health_check_job`,
/// `queue_instance_health_check`, `queue_reload_job`.
pub struct QueueLimiter {
    buckets: HashMap<&'static str, Arc<Bucket>>,
}

pub const QUEUE_SYNCER_JOB: &str = "queue_syncer_job";
pub const QUEUE_HEALTH_CHECK_JOB: &str = "queue_health_check_job";
pub const QUEUE_INSTANCE_HEALTH_CHECK: &str = "queue_instance_health_check";
pub const QUEUE_RELOAD_JOB: &str = "queue_reload_job";

impl Default for QueueLimiter {
    fn default() -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(QUEUE_SYNCER_JOB, Arc::new(Bucket::new(50.0)));
        buckets.insert(QUEUE_HEALTH_CHECK_JOB, Arc::new(Bucket::new(50.0)));
        buckets.insert(QUEUE_INSTANCE_HEALTH_CHECK, Arc::new(Bucket::new(100.0)));
        buckets.insert(QUEUE_RELOAD_JOB, Arc::new(Bucket::new(1.0)));
        Self { buckets }
    }
}

impl QueueLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a slot on `queue`. Returns `false` if the queue's backlog
    /// exceeds its wait budget, in which case the caller must skip the task
    /// rather than dispatch it; a rejection is recorded either way.
    pub async fn acquire(&self, queue: &'static str) -> bool {
        match self.buckets.get(queue) {
            Some(bucket) => {
                if bucket.acquire().await {
                    metrics::counter!("syncer_queue_dispatched_total", "queue" => queue).increment(1);
                    true
                } else {
                    metrics::counter!("syncer_queue_rejected_total", "queue" => queue).increment(1);
                    false
                }
            }
            None => {
                tracing::warn!("scheduler: unknown queue {queue}, dispatching unthrottled");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_throttles_burst_above_rate() {
        let bucket = Bucket::new(1000.0);
        // max_tokens == rate, so a burst of exactly `rate` should not block.
        for _ in 0..1000 {
            assert!(bucket.acquire().await);
        }
    }

    #[tokio::test]
    async fn bucket_rejects_when_backlog_exceeds_wait_budget() {
        let bucket = Bucket::new(0.1);
        assert!(bucket.acquire().await);
        assert!(!bucket.acquire().await);
    }

    #[tokio::test]
    async fn queue_limiter_acquires_known_queue() {
        let limiter = QueueLimiter::new();
        assert!(limiter.acquire(QUEUE_RELOAD_JOB).await);
    }
}
