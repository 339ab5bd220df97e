//! Per-client limiter state with idle eviction.
//!
//! Every read and write of client state, including the reaper's sweep, runs
//! under one `parking_lot::Mutex`. The critical section is pure arithmetic.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bulwark_core::ClockSource;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::bucket::TokenBucket;
use super::config::LimiterConfig;

/// Clients not seen for longer than this are evicted by the reaper.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(180);

/// Interval between reaper sweeps.
pub const REAPER_PERIOD: Duration = Duration::from_secs(60);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

impl Admission {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }
}

/// Limiter state tracked for a single client identity.
#[derive(Debug, Clone)]
struct ClientState {
    bucket: TokenBucket,
    last_seen_ms: u64,
}

/// Handle to the spawned reaper task.
struct Reaper {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Concurrent map from client identity to token-bucket state.
///
/// Identities are materialized lazily with a full bucket on first check. An
/// evicted identity is indistinguishable from one never seen.
pub struct ClientRegistry {
    config: LimiterConfig,
    clock: Arc<dyn ClockSource>,
    clients: Mutex<HashMap<String, ClientState>>,
    reaper: Mutex<Option<Reaper>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(config: LimiterConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            config,
            clock,
            clients: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
        }
    }

    /// Refills the identity's bucket and tries to take one token.
    ///
    /// The clock is read and last-seen stamped while the lock is held, so
    /// stamps never go backwards and a concurrent sweep never evicts an
    /// entry that a check has just touched.
    pub fn check(&self, identity: &str) -> Admission {
        let LimiterConfig {
            capacity,
            refill_rate,
            ..
        } = self.config;

        let mut clients = self.clients.lock();
        let now = self.clock.now();
        let state = clients
            .entry(identity.to_owned())
            .or_insert_with(|| ClientState {
                bucket: TokenBucket::full(capacity, now),
                last_seen_ms: now,
            });
        state.last_seen_ms = now;

        if state.bucket.try_acquire(now, capacity, refill_rate) {
            Admission::Allow
        } else {
            Admission::Deny
        }
    }

    /// Removes every client idle for longer than [`IDLE_THRESHOLD`].
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let threshold_ms = u64::try_from(IDLE_THRESHOLD.as_millis()).unwrap_or(u64::MAX);

        let mut clients = self.clients.lock();
        let now = self.clock.now();
        let before = clients.len();
        clients.retain(|_, state| now.saturating_sub(state.last_seen_ms) <= threshold_ms);
        before - clients.len()
    }

    /// Number of tracked identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.clients.lock().contains_key(identity)
    }

    /// Tokens currently held by `identity`, without refilling.
    #[must_use]
    pub fn tokens(&self, identity: &str) -> Option<f64> {
        self.clients
            .lock()
            .get(identity)
            .map(|state| state.bucket.tokens())
    }

    /// Spawns the periodic reaper. Calling this while it runs is a no-op.
    ///
    /// The task holds only a weak reference, so dropping the last registry
    /// handle ends it at the next tick.
    pub fn start_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock();
        if slot.is_some() {
            return;
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_PERIOD);
            // Skip the immediate first tick.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        let evicted = registry.sweep();
                        if evicted > 0 {
                            debug!(evicted, remaining = registry.len(), "evicted idle clients");
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        *slot = Some(Reaper {
            shutdown_tx,
            handle,
        });
    }

    /// Stops the reaper and waits for its task to exit.
    pub async fn stop_reaper(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            let _ = reaper.shutdown_tx.send(());
            let _ = reaper.handle.await;
        }
    }

    #[must_use]
    pub fn is_reaper_running(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}
