//! Bounded retry of provider calls that time out

use crate::config::PipelineConfig;
use crate::error::{PilotError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            timeout: config.provider_timeout(),
            max_retries: config.provider_max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Exponential backoff plus up to half a base interval of jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = if base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

/// Run `op`, retrying only on provider timeouts (including exceeding
/// `policy.timeout`), at most `policy.max_retries` times
pub async fn with_provider_retry<T, F, Fut>(policy: &RetryPolicy, stage: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(PilotError::ProviderTimeout(format!(
                "{} exceeded {}ms",
                stage,
                policy.timeout.as_millis()
            ))),
        };
        match result {
            Err(PilotError::ProviderTimeout(message)) if attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                attempt += 1;
                warn!(
                    "{} timed out ({}); retry {}/{} in {}ms",
                    stage,
                    message,
                    attempt,
                    policy.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_timeouts_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_provider_retry(&policy(2), "generating", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PilotError::ProviderTimeout("slow".into()))
            } else {
                Ok("SELECT 1")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "SELECT 1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_provider_retry(&policy(1), "generating", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PilotError::ProviderTimeout("slow".into()))
        })
        .await;
        assert!(matches!(result, Err(PilotError::ProviderTimeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_provider_retry(&policy(3), "validating", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PilotError::Validation("not a query".into()))
        })
        .await;
        assert!(matches!(result, Err(PilotError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_attempt_counts_as_timeout() {
        let mut policy = policy(0);
        policy.timeout = Duration::from_millis(10);
        let result = with_provider_retry(&policy, "explaining", || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(PilotError::ProviderTimeout(_))));
    }
}
