//! Gateway-level publish retries with exponential backoff.
//!
//! The bridge never retries. A gateway may, before it reports a publish
//! failure upward; [`RetryingGateway`] adds that policy to any
//! [`BrokerGateway`]. Subscriptions are passed through untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use reqbridge_runtime::retry::{RetryPolicy, RetryingGateway};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(50))
//!     .build();
//!
//! let gateway = RetryingGateway::new(redpanda_gateway, policy);
//! ```

use crate::metrics::BridgeMetrics;
use reqbridge_core::{
    BrokerGateway, CorrelationId, GatewayFuture, OutboundMessage, ReplyHandler, Subscription,
};
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// Returns the first success, or the last error once `max_retries` retries
/// have failed.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) if attempt >= policy.max_retries => {
                if policy.max_retries > 0 {
                    tracing::error!(attempt, error = %err, "Operation failed after max retries");
                }
                return Err(err);
            },
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

/// [`BrokerGateway`] decorator that retries failed publishes.
#[derive(Debug)]
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: BrokerGateway> RetryingGateway<G> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub const fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped gateway.
    #[must_use]
    pub const fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: BrokerGateway> BrokerGateway for RetryingGateway<G> {
    fn publish<'a>(&'a self, message: &'a OutboundMessage) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut first = true;
            retry_with_backoff(&self.policy, || {
                if !std::mem::take(&mut first) {
                    BridgeMetrics::record_publish_retry();
                }
                self.inner.publish(message)
            })
            .await
        })
    }

    fn subscribe_scoped<'a>(
        &'a self,
        id: &'a CorrelationId,
        on_reply: ReplyHandler,
    ) -> GatewayFuture<'a, Subscription> {
        self.inner.subscribe_scoped(id, on_reply)
    }

    fn reply_address(&self, id: &CorrelationId) -> String {
        self.inner.reply_address(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqbridge_core::{BridgeRequest, Delivery, GatewayError};
    use reqbridge_testing::InMemoryGateway;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` publishes, then accepts everything.
    struct FlakyGateway {
        failures: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl FlakyGateway {
        fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl BrokerGateway for FlakyGateway {
        fn publish<'a>(&'a self, message: &'a OutboundMessage) -> GatewayFuture<'a, ()> {
            Box::pin(async move {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                let remaining = self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
                match remaining {
                    Ok(_) => Err(GatewayError::PublishFailed {
                        destination: message.destination().to_string(),
                        reason: format!("attempt {attempt}"),
                    }),
                    Err(_) => Ok(()),
                }
            })
        }

        fn subscribe_scoped<'a>(
            &'a self,
            id: &'a CorrelationId,
            _on_reply: ReplyHandler,
        ) -> GatewayFuture<'a, Subscription> {
            Box::pin(async move {
                Err(GatewayError::SubscribeFailed {
                    id: id.clone(),
                    reason: "not supported".to_string(),
                })
            })
        }

        fn reply_address(&self, id: &CorrelationId) -> String {
            format!("flaky.{id}")
        }
    }

    fn message() -> OutboundMessage {
        let request = BridgeRequest::new("POST", "/orders", br#"{"sku":"A1"}"#.to_vec());
        OutboundMessage::new(
            CorrelationId::new("call-1"),
            &request,
            request.json_body().unwrap(),
            "orders".to_string(),
            "replies.call-1".to_string(),
        )
        .unwrap()
    }

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(20))
            .build()
    }

    #[test]
    fn backoff_schedule_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(50))
            .multiplier(3.0)
            .max_delay(Duration::from_secs(1))
            .build();

        let schedule: Vec<_> = (0..5).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(
            schedule,
            [50, 150, 450, 1000, 1000].map(Duration::from_millis)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_publish_failures_are_retried_with_backoff() {
        let gateway = RetryingGateway::new(FlakyGateway::failing(2), policy(3));
        let started = Instant::now();

        gateway.publish(&message()).await.unwrap();

        assert_eq!(gateway.inner().attempts(), 3);
        // 20ms then 40ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(60) && elapsed < Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_the_last_failure() {
        let gateway = RetryingGateway::new(FlakyGateway::failing(10), policy(2));

        let err = gateway.publish(&message()).await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::PublishFailed {
                destination: "orders".to_string(),
                reason: "attempt 2".to_string(),
            }
        );
        assert_eq!(gateway.inner().attempts(), 3);
    }

    #[tokio::test]
    async fn no_retry_policy_publishes_once() {
        let gateway = RetryingGateway::new(FlakyGateway::failing(1), RetryPolicy::none());

        assert!(gateway.publish(&message()).await.is_err());
        assert_eq!(gateway.inner().attempts(), 1);
    }

    #[tokio::test]
    async fn subscriptions_and_addresses_pass_through() {
        let inner = InMemoryGateway::new();
        let gateway = RetryingGateway::new(inner.clone(), policy(3));
        let id = CorrelationId::new("call-9");

        let mut subscription = gateway
            .subscribe_scoped(&id, Arc::new(|_: Delivery| {}))
            .await
            .unwrap();

        assert_eq!(gateway.reply_address(&id), "replies.call-9");
        assert_eq!(inner.open_subscriptions(), 1);
        subscription.close();
        assert_eq!(inner.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn subscribe_failures_are_not_retried() {
        let gateway = RetryingGateway::new(FlakyGateway::failing(0), policy(3));
        let id = CorrelationId::new("call-2");

        let result = gateway.subscribe_scoped(&id, Arc::new(|_: Delivery| {})).await;

        assert!(matches!(result, Err(GatewayError::SubscribeFailed { .. })));
        assert_eq!(gateway.reply_address(&id), "flaky.call-2");
    }
}
