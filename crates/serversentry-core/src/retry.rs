//! Retry mechanisms with exponential backoff and jitter, used by the
//! notification dispatcher's delivery retry budget (§4.8: up to 2 retries,
//! backoff 1s, 4s).

use crate::{Error, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub max_jitter: f64,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
            max_jitter: 0.1,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Notification delivery's fixed retry budget: one initial attempt plus up
/// to 2 retries, backoff 1s then 4s.
impl RetryConfig {
    pub fn delivery_budget() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            backoff_multiplier: 4.0,
            use_jitter: false,
            max_jitter: 0.0,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RetryStrategy {
    NoRetry,
    FixedDelay(Duration),
    ExponentialBackoff { config: RetryConfig },
    Custom { delays: Vec<Duration> },
}

impl RetryStrategy {
    pub fn exponential_backoff() -> Self {
        Self::ExponentialBackoff { config: RetryConfig::default() }
    }

    pub fn exponential_backoff_with_config(config: RetryConfig) -> Self {
        Self::ExponentialBackoff { config }
    }

    pub fn fixed_delay(delay: Duration) -> Self {
        Self::FixedDelay(delay)
    }

    pub fn custom_delays(delays: Vec<Duration>) -> Self {
        Self::Custom { delays }
    }

    /// The dispatcher's delivery retry strategy: 1s then 4s, only for
    /// transient faults; permanent faults never retry.
    pub fn for_error(error: &Error) -> Self {
        match error {
            Error::Delivery { kind, .. } if kind.to_string() == "transient" => {
                Self::custom_delays(vec![Duration::from_secs(1), Duration::from_secs(4)])
            }
            _ => Self::NoRetry,
        }
    }
}

/// Executes an operation according to a [`RetryStrategy`].
pub struct RetryExecutor {
    strategy: RetryStrategy,
    operation_name: String,
}

impl RetryExecutor {
    pub fn new(strategy: RetryStrategy, operation_name: String) -> Self {
        Self { strategy, operation_name }
    }

    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug,
    {
        match &self.strategy {
            RetryStrategy::NoRetry => {
                debug!("executing {} without retry", self.operation_name);
                operation().await.map_err(Into::into)
            }
            RetryStrategy::FixedDelay(delay) => self.execute_with_fixed_delay(*delay, operation).await,
            RetryStrategy::ExponentialBackoff { config } => {
                self.execute_with_exponential_backoff(config, operation).await
            }
            RetryStrategy::Custom { delays } => self.execute_with_custom_delays(delays, operation).await,
        }
    }

    async fn execute_with_fixed_delay<F, T, E>(&self, delay: Duration, operation: F) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug,
    {
        let mut last_error = None;
        for attempt in 1..=3u32 {
            debug!("executing {} (attempt {attempt}/3)", self.operation_name);
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {attempt}", self.operation_name);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let error = e.into();
                    warn!("{} failed on attempt {attempt}: {error}", self.operation_name);
                    last_error = Some(error);
                    if attempt < 3 {
                        sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Internal("no error recorded".into())))
    }

    async fn execute_with_exponential_backoff<F, T, E>(&self, config: &RetryConfig, operation: F) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug,
    {
        let mut last_error = None;
        let mut current_delay = config.base_delay;

        for attempt in 1..=config.max_attempts {
            debug!("executing {} (attempt {attempt}/{})", self.operation_name, config.max_attempts);

            let result = if let Some(timeout) = config.attempt_timeout {
                tokio::time::timeout(timeout, operation()).await
            } else {
                Ok(operation().await)
            };

            match result {
                Ok(Ok(result)) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {attempt}", self.operation_name);
                    }
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    let error = e.into();
                    warn!("{} failed on attempt {attempt}: {error}", self.operation_name);
                    last_error = Some(error);
                }
                Err(_) => {
                    let error = Error::Internal(format!(
                        "{} timed out on attempt {attempt}",
                        self.operation_name
                    ));
                    warn!("{error}");
                    last_error = Some(error);
                }
            }

            if attempt < config.max_attempts {
                let delay = if config.use_jitter { add_jitter(current_delay, config.max_jitter) } else { current_delay };
                sleep(delay).await;
                current_delay = Duration::from_millis(
                    ((current_delay.as_millis() as f64) * config.backoff_multiplier) as u64,
                )
                .min(config.max_delay);
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Internal("no error recorded".into())))
    }

    async fn execute_with_custom_delays<F, T, E>(&self, delays: &[Duration], operation: F) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug,
    {
        let max_attempts = delays.len() + 1;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!("executing {} (attempt {attempt}/{max_attempts})", self.operation_name);
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {attempt}", self.operation_name);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let error = e.into();
                    warn!("{} failed on attempt {attempt}: {error}", self.operation_name);
                    let retryable = error.is_retryable();
                    last_error = Some(error);
                    if !retryable {
                        break;
                    }
                    if attempt <= delays.len() {
                        sleep(delays[attempt - 1]).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Internal("no error recorded".into())))
    }
}

fn add_jitter(delay: Duration, max_jitter: f64) -> Duration {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    let seed = hasher.finish();

    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) >> 16) & 0x7fff;
    let jitter_factor = (random as f64 / 32767.0) * max_jitter;

    let delay_ms = delay.as_millis() as f64;
    Duration::from_millis((delay_ms + delay_ms * jitter_factor) as u64)
}

pub async fn retry_operation<F, T, E>(operation_name: &str, strategy: RetryStrategy, operation: F) -> Result<T>
where
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
    E: Into<Error> + std::fmt::Debug,
{
    RetryExecutor::new(strategy, operation_name.to_string()).execute(operation).await
}

pub async fn retry_for_error<F, T, E>(operation_name: &str, sample_error: &Error, operation: F) -> Result<T>
where
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
    E: Into<Error> + std::fmt::Debug,
{
    retry_operation(operation_name, RetryStrategy::for_error(sample_error), operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let executor = RetryExecutor::new(RetryStrategy::exponential_backoff(), "test".into());
        let result = executor.execute(|| Box::pin(async { Ok::<i32, Error>(42) })).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let executor = RetryExecutor::new(RetryStrategy::fixed_delay(Duration::from_millis(5)), "test".into());
        let counter = Arc::new(AtomicU32::new(0));
        let result = executor
            .execute(|| {
                let counter = counter.clone();
                Box::pin(async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(Error::delivery_transient("temporary failure"))
                    } else {
                        Ok(42)
                    }
                })
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn delivery_budget_is_two_retries() {
        let executor = RetryExecutor::new(
            RetryStrategy::custom_delays(vec![Duration::from_millis(1), Duration::from_millis(1)]),
            "test".into(),
        );
        let counter = Arc::new(AtomicU32::new(0));
        let result: Result<i32> = executor
            .execute(|| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::delivery_transient("still failing"))
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn custom_delays_stop_immediately_on_permanent_error() {
        let executor = RetryExecutor::new(
            RetryStrategy::custom_delays(vec![Duration::from_millis(1), Duration::from_millis(1)]),
            "test".into(),
        );
        let counter = Arc::new(AtomicU32::new(0));
        let result: Result<i32> = executor
            .execute(|| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::delivery_permanent("bad request"))
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1, "permanent errors must not be retried");
    }

    #[test]
    fn permanent_delivery_errors_never_retry() {
        let strategy = RetryStrategy::for_error(&Error::delivery_permanent("bad request"));
        assert!(matches!(strategy, RetryStrategy::NoRetry));
    }
}
