//! Upstream request rate limiter.
//!
//! The market API enforces a strict global request cap, so the limiter is a
//! process-wide singleton shared by every worker. It uses a queued sliding
//! window: callers reserve the next free slot under a lock and sleep outside
//! it, which serializes acquisitions without holding the lock across I/O.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    slots: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `max_requests` per `window`. Both must be positive.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        assert!(max_requests > 0, "max_requests must be positive");
        assert!(window > Duration::ZERO, "window must be positive");
        RateLimiter {
            max_requests,
            window,
            slots: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until one request may proceed.
    ///
    /// Over any span of `window`, at most `max_requests` acquisitions
    /// complete, even under concurrent callers: each caller is assigned a
    /// scheduled instant at least `window` after the slot `max_requests`
    /// places behind it.
    pub async fn acquire(&self) {
        let scheduled = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            Self::drop_expired(&mut slots, now, self.window);

            let scheduled = if slots.len() < self.max_requests {
                now
            } else {
                let anchor = slots[slots.len() - self.max_requests];
                now.max(anchor + self.window)
            };
            slots.push_back(scheduled);
            scheduled
        };

        let now = Instant::now();
        if scheduled > now {
            tokio::time::sleep_until(scheduled).await;
        }
    }

    /// Number of acquisitions whose scheduled instant falls in the current window.
    pub async fn current_rate(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        Self::drop_expired(&mut slots, now, self.window);
        slots.iter().filter(|&&t| t <= now).count()
    }

    fn drop_expired(slots: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = slots.front() {
            if now.duration_since(front) >= window {
                slots.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_burst_passes_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_acquisition_waits_a_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn window_cap_holds_under_concurrency() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_secs(1)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..9 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut completions = Vec::new();
        for handle in handles {
            completions.push(handle.await.unwrap());
        }
        completions.sort();

        // With 3 req/s, 9 acquisitions need at least 2 full windows.
        assert!(start.elapsed() >= Duration::from_secs(2));

        // No window of 1s may contain more than 3 completions.
        for i in 0..completions.len() {
            let window_end = completions[i] + Duration::from_secs(1);
            let in_window = completions[i..]
                .iter()
                .filter(|&&t| t < window_end)
                .count();
            assert!(in_window <= 3, "{} acquisitions inside one window", in_window);
        }
    }
}
