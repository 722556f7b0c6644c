//! Per-host request spacing.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum delay between consecutive requests to the same host.
///
/// Each caller reserves the next free slot for its host under the lock and
/// then sleeps outside it, so concurrent callers for one host are spaced
/// out while different hosts never wait on each other.
#[derive(Debug)]
pub struct HostRateLimiter {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request to `host` is allowed.
    pub async fn acquire(&self, host: &str) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(host)
                .copied()
                .filter(|t| *t > now)
                .unwrap_or(now);
            slots.insert(host.to_string(), slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_requests_to_same_host() {
        let limiter = HostRateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();

        limiter.acquire("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));

        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(100));

        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn different_hosts_do_not_wait() {
        let limiter = HostRateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();

        limiter.acquire("a.example").await;
        limiter.acquire("b.example").await;
        limiter.acquire("c.example").await;

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_get_distinct_slots() {
        let limiter = std::sync::Arc::new(HostRateLimiter::new(Duration::from_millis(50)));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire("example.com").await;
                    start.elapsed()
                })
            })
            .collect();

        let mut elapsed = Vec::new();
        for h in handles {
            elapsed.push(h.await.unwrap());
        }
        elapsed.sort();

        assert!(elapsed[3] >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let limiter = HostRateLimiter::new(Duration::ZERO);
        for _ in 0..100 {
            limiter.acquire("example.com").await;
        }
    }
}
