use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_jitter_factor: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_jitter_factor: Some(0.3),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with full jitter, bounded by `max_delay` — used both
    /// by the circuit breaker's closed/half-open retries and by outbound
    /// adapter clients.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt as i32);
        let base = (self.min_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jittered = match self.max_jitter_factor {
            Some(factor) if factor > 0.0 => base * (1.0 - factor * fastrand::f64()),
            _ => base,
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Retries `action` against `context` up to `retry_config.max_attempts` times,
/// sleeping with exponential-backoff-plus-jitter between attempts, stopping
/// early when `is_retriable` reports the last error as permanent.
pub async fn with_retries<Context, T, E>(
    component: &str,
    operation: &str,
    detail: Option<String>,
    retry_config: &RetryConfig,
    context: &Context,
    action: impl Fn(&Context) -> BoxFuture<'_, Result<T, E>>,
    is_retriable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    Context: ?Sized,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match action(context).await {
            Ok(value) => {
                if attempt > 0 {
                    info!(component, operation, attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(error) => {
                attempt += 1;
                let retriable = is_retriable(&error);
                let exhausted = attempt >= retry_config.max_attempts;
                warn!(
                    component,
                    operation,
                    detail = detail.as_deref().unwrap_or(""),
                    attempt,
                    retriable,
                    error = %error,
                    "operation failed"
                );
                if !retriable || exhausted {
                    return Err(error);
                }
                tokio::time::sleep(retry_config.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_r::test;

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 5,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 1.0,
            max_jitter_factor: None,
        };
        let result: Result<u32, String> = with_retries(
            "test",
            "op",
            None,
            &config,
            &calls,
            |calls| {
                Box::pin(async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(n)
                    }
                })
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn stops_immediately_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<(), String> = with_retries(
            "test",
            "op",
            None,
            &config,
            &calls,
            |calls| {
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("permanent".to_string())
                })
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
