//! Bounded-retry decorator for completion gateways.
//!
//! Wraps any [`CompletionGateway`] and retries rate-limited or transient
//! failures a fixed number of times with a fixed delay. Fatal errors pass
//! through untouched on the first attempt; retrying a broken request only
//! burns quota.

use async_trait::async_trait;
use kotoba_core::gateway::{Completion, CompletionGateway, CompletionRequest, GatewayError};
use std::sync::Arc;
use std::time::Duration;

/// Retry tuning.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait between attempts; a server-sent `retry_after` overrides it.
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
        }
    }
}

/// A gateway decorator with bounded retry.
pub struct RetryingGateway {
    inner: Arc<dyn CompletionGateway>,
    config: RetryConfig,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn CompletionGateway>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn with_defaults(inner: Arc<dyn CompletionGateway>) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    fn delay_for(&self, err: &GatewayError) -> Duration {
        match err {
            GatewayError::RateLimited {
                retry_after: Some(secs),
            } => Duration::from_secs(*secs),
            _ => self.config.retry_delay,
        }
    }
}

#[async_trait]
impl CompletionGateway for RetryingGateway {
    fn name(&self) -> &str {
        "retrying"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(completion) => {
                    if attempt > 0 {
                        tracing::info!(
                            gateway = self.inner.name(),
                            attempt = attempt + 1,
                            "Completion recovered after retries"
                        );
                    }
                    return Ok(completion);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt >= self.config.max_retries {
                        tracing::warn!(
                            gateway = self.inner.name(),
                            attempts = attempt + 1,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.delay_for(&err);
                    tracing::warn!(
                        gateway = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kotoba_core::gateway::TokenUsage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway that fails the first `fail_until` calls.
    struct FlakyGateway {
        calls: Arc<AtomicUsize>,
        fail_until: usize,
        error: GatewayError,
    }

    impl FlakyGateway {
        fn new(fail_until: usize, error: GatewayError) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    fail_until,
                    error,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl CompletionGateway for FlakyGateway {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, GatewayError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_until {
                return Err(self.error.clone());
            }
            Ok(Completion {
                text: "回應".into(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn make_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![],
            temperature: 0.9,
            max_tokens: 150,
        }
    }

    fn quick_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let (inner, calls) = FlakyGateway::new(0, GatewayError::Transient("n/a".into()));
        let gateway = RetryingGateway::new(Arc::new(inner), quick_config(3));

        let completion = gateway.complete(make_request()).await.unwrap();
        assert_eq!(completion.text, "回應");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_retried_then_succeed() {
        let (inner, calls) = FlakyGateway::new(2, GatewayError::Transient("502".into()));
        let gateway = RetryingGateway::new(Arc::new(inner), quick_config(3));

        gateway.complete(make_request()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_with_zero_hint_retries_immediately() {
        let (inner, calls) = FlakyGateway::new(
            1,
            GatewayError::RateLimited {
                retry_after: Some(0),
            },
        );
        let gateway = RetryingGateway::new(Arc::new(inner), quick_config(3));

        gateway.complete(make_request()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_is_never_retried() {
        let (inner, calls) = FlakyGateway::new(usize::MAX, GatewayError::Fatal("bad".into()));
        let gateway = RetryingGateway::new(Arc::new(inner), quick_config(3));

        let err = gateway.complete(make_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let (inner, calls) = FlakyGateway::new(usize::MAX, GatewayError::Transient("down".into()));
        let gateway = RetryingGateway::new(Arc::new(inner), quick_config(2));

        let err = gateway.complete(make_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transient(_)));
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn server_hint_beats_configured_delay() {
        let (inner, _) = FlakyGateway::new(0, GatewayError::Transient("n/a".into()));
        let gateway = RetryingGateway::new(
            Arc::new(inner),
            RetryConfig {
                max_retries: 1,
                retry_delay: Duration::from_secs(10),
            },
        );

        let hinted = GatewayError::RateLimited {
            retry_after: Some(2),
        };
        assert_eq!(gateway.delay_for(&hinted), Duration::from_secs(2));

        let unhinted = GatewayError::Transient("502".into());
        assert_eq!(gateway.delay_for(&unhinted), Duration::from_secs(10));
    }
}
