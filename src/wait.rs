//! Bounded polling with exponential backoff.

use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub timeout: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, timeout: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            timeout,
        }
    }
}

/// Result of polling a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    TimedOut(T),
}

/// Calls `check` until it reports done or the timeout elapses.
///
/// The check returns `(done, value)`; the last value is handed back in
/// either case so callers can report what they saw.  Check errors end the
/// wait immediately.
pub async fn poll_until<T, E, F, Fut>(backoff: Backoff, what: &str, mut check: F) -> Result<Poll<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(bool, T), E>>,
{
    let started = Instant::now();
    let mut delay = backoff.initial;
    loop {
        let (done, value) = check().await?;
        if done {
            return Ok(Poll::Ready(value));
        }
        let elapsed = started.elapsed();
        if elapsed >= backoff.timeout {
            return Ok(Poll::TimedOut(value));
        }
        let pause = delay.min(backoff.timeout - elapsed);
        debug!("Waiting {:?} for {}", pause, what);
        sleep(pause).await;
        delay = (delay * 2).min(backoff.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(timeout_ms: u64) -> Backoff {
        Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn returns_once_condition_holds() {
        let mut attempts = 0;
        let outcome: Result<_, ()> = poll_until(fast(1_000), "test", || {
            attempts += 1;
            let n = attempts;
            async move { Ok((n >= 3, n)) }
        })
        .await;
        assert_eq!(outcome, Ok(Poll::Ready(3)));
    }

    #[tokio::test]
    async fn times_out_with_last_observation() {
        let outcome: Result<_, ()> =
            poll_until(fast(10), "test", || async { Ok((false, "pending")) }).await;
        assert_eq!(outcome, Ok(Poll::TimedOut("pending")));
    }

    #[tokio::test]
    async fn check_error_ends_the_wait() {
        let outcome: Result<Poll<()>, &str> =
            poll_until(fast(1_000), "test", || async { Err("unreachable") }).await;
        assert_eq!(outcome, Err("unreachable"));
    }
}
