use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Exponential retry schedule: `min(max_delay, base * 2^attempt)` with a
/// symmetric random jitter expressed as a fraction of the delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        let spread = capped.as_secs_f64() * self.jitter;
        if spread <= 0.0 {
            return capped;
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }
}

/// Runs `op` until it succeeds or the policy's attempts are spent, sleeping
/// between tries. `on_retry` sees each failure that will be retried.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E, Duration),
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < policy.attempts => {
                let delay = policy.delay_for(attempt);
                on_retry(attempt, &e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_until_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy =
            RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(60)).with_jitter(0.2);
        let secs = policy.delay_for(0).as_secs_f64();
        assert!((8.0..=12.0).contains(&secs), "delay was {}", secs);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(10), Duration::from_secs(1));
        let mut retried = Vec::new();

        let res: Result<u32, &str> = retry_with_backoff(
            &policy,
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("not yet") } else { Ok(7) } }
            },
            |attempt, _, _| retried.push(attempt),
        )
        .await;

        assert_eq!(res, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retried, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_last_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1));

        let res: Result<(), &str> = retry_with_backoff(
            &policy,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            },
            |_, _, _| {},
        )
        .await;

        assert_eq!(res, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
