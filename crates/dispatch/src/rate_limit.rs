use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Allows at most `limit` acquisitions inside any sliding `window`.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            stamps: VecDeque::with_capacity(limit.max(1)),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.stamps.len() < self.limit {
            self.stamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Earliest instant at which a slot frees up, `None` if one is free now.
    pub fn next_free(&mut self, now: Instant) -> Option<Instant> {
        self.evict(now);
        if self.stamps.len() < self.limit {
            None
        } else {
            self.stamps.front().map(|oldest| *oldest + self.window)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_capped_until_window_slides() {
        let mut limiter = SlidingWindow::new(2, Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(limiter.try_acquire(t0));
        assert!(limiter.try_acquire(t0));
        assert!(!limiter.try_acquire(t0));
        assert!(!limiter.try_acquire(t0 + Duration::from_millis(999)));
        assert_eq!(limiter.next_free(t0), Some(t0 + Duration::from_secs(1)));

        let t1 = t0 + Duration::from_secs(1);
        assert!(limiter.try_acquire(t1));
        assert!(limiter.try_acquire(t1));
        assert!(!limiter.try_acquire(t1));
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_acquisitions_free_one_at_a_time() {
        let mut limiter = SlidingWindow::new(2, Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(limiter.try_acquire(t0));
        assert!(limiter.try_acquire(t0 + Duration::from_millis(600)));
        assert!(!limiter.try_acquire(t0 + Duration::from_millis(900)));
        assert!(limiter.try_acquire(t0 + Duration::from_millis(1000)));
        assert!(!limiter.try_acquire(t0 + Duration::from_millis(1500)));
        assert_eq!(limiter.next_free(t0 + Duration::from_millis(1500)), Some(t0 + Duration::from_millis(1600)));
    }
}
