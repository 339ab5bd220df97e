//! Bounded, fixed-delay retry for best-effort delivery.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::notify::{Notification, Notifier, NotifyError};

/// Total attempts made for one delivery.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between consecutive attempts. None follows the final attempt.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Attempt count and spacing for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}

/// Every attempt failed.
#[derive(Debug, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    /// The error from the final attempt.
    pub last_error: E,
}

/// Calls `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `op` receives the 1-based attempt number. A policy with zero attempts is
/// treated as one.
///
/// # Errors
///
/// Returns [`Exhausted`] carrying the last attempt's error.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(last_error) if attempt >= attempts => {
                return Err(Exhausted {
                    attempts,
                    last_error,
                })
            }
            Err(err) => {
                debug!(attempt, error = %err, "attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

/// A notification could not be delivered within the retry budget.
#[derive(Debug, thiserror::Error)]
#[error("delivery to {recipient} failed after {attempts} attempts: {source}")]
pub struct DeliveryError {
    pub recipient: String,
    pub attempts: u32,
    #[source]
    pub source: NotifyError,
}

/// Wraps a [`Notifier`] with the fixed retry policy.
pub struct DeliveryRetrier<N: ?Sized> {
    notifier: Arc<N>,
    policy: RetryPolicy,
}

impl<N: Notifier + ?Sized> DeliveryRetrier<N> {
    #[must_use]
    pub fn new(notifier: Arc<N>) -> Self {
        Self::with_policy(notifier, RetryPolicy::default())
    }

    #[must_use]
    pub fn with_policy(notifier: Arc<N>, policy: RetryPolicy) -> Self {
        Self { notifier, policy }
    }

    /// Delivers `notification`, retrying failed attempts.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] with the final attempt's error once every
    /// attempt has failed.
    pub async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let notifier = &self.notifier;
        with_retry(self.policy, move |_| notifier.deliver(notification))
            .await
            .map_err(|exhausted| {
                metrics::counter!("notification_delivery_failures_total").increment(1);
                DeliveryError {
                    recipient: notification.recipient.clone(),
                    attempts: exhausted.attempts,
                    source: exhausted.last_error,
                }
            })
    }
}
