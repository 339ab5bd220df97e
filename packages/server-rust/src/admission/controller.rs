//! Admission controller: the single per-request gate in front of all handlers.

use std::sync::Arc;

use bulwark_core::ClockSource;
use tracing::debug;

use super::config::LimiterConfig;
use super::registry::{Admission, ClientRegistry};

/// Decides whether a unit of work from a client identity may proceed.
///
/// When rate limiting is disabled every request is admitted and the registry
/// is never touched.
pub struct AdmissionController {
    enabled: bool,
    registry: Arc<ClientRegistry>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(config: LimiterConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            enabled: config.enabled,
            registry: Arc::new(ClientRegistry::new(config, clock)),
        }
    }

    pub fn admit(&self, identity: &str) -> Admission {
        if !self.enabled {
            return Admission::Allow;
        }

        let admission = self.registry.check(identity);
        if admission == Admission::Deny {
            metrics::counter!("admission_denied_total").increment(1);
            debug!(client = identity, "admission denied");
        }
        admission
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts idle-client eviction.
    pub fn start(&self) {
        self.registry.start_reaper();
    }

    /// Stops idle-client eviction and waits for the reaper to exit.
    pub async fn stop(&self) {
        self.registry.stop_reaper().await;
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }
}
