//! Background execution lane.
//!
//! - [`dispatcher`]: fire-and-forget task spawning with fault containment
//! - [`retry`]: bounded fixed-delay retry around one fallible send
//! - [`notify`]: notification back ends (webhook, log)

pub mod dispatcher;
pub mod notify;
pub mod retry;

pub use dispatcher::{Dispatcher, TaskError};
pub use notify::{
    build_notifier, LogNotifier, Notification, Notifier, NotifierConfig, NotifyError,
    WebhookNotifier,
};
pub use retry::{
    with_retry, DeliveryError, DeliveryRetrier, Exhausted, RetryPolicy, MAX_ATTEMPTS, RETRY_DELAY,
};
