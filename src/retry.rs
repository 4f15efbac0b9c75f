//! Exponential backoff with jitter for sink writes: a bounded number of
//! retries before the circuit breaker gets to see the failure.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

fn build_backoff(config: &RetryConfig) -> backoff::ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial_interval)
        .with_max_interval(config.max_interval)
        .with_multiplier(config.multiplier)
        .with_max_elapsed_time(None)
        .build()
}

/// Retries `op` up to `config.max_attempts` times with exponential backoff
/// and jitter, returning the last error if all attempts fail. Bounded: this
/// never retries indefinitely, which matters on the hot write path where a
/// stuck sink must still let the circuit breaker trip.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = build_backoff(config);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_attempts {
                    return Err(err);
                }
                let wait = backoff.next_backoff().unwrap_or(config.max_interval);
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig { max_attempts: 5, initial_interval: Duration::from_millis(1), ..Default::default() };
        let result: Result<&str, &str> = retry_with_backoff(&config, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("not yet")
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = RetryConfig { max_attempts: 2, initial_interval: Duration::from_millis(1), ..Default::default() };
        let result: Result<&str, &str> = retry_with_backoff(&config, || async { Err("always fails") }).await;
        assert_eq!(result, Err("always fails"));
    }
}
