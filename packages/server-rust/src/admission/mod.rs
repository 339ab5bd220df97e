//! Per-client admission control.
//!
//! Each client identity owns a token bucket. A request is admitted when a
//! whole token is available. Idle buckets are evicted by a periodic reaper.

pub mod bucket;
pub mod config;
pub mod controller;
pub mod identity;
pub mod layer;
pub mod registry;

pub use bucket::TokenBucket;
pub use config::{ConfigError, LimiterConfig};
pub use controller::AdmissionController;
pub use identity::{client_identity, UNKNOWN_CLIENT};
pub use layer::{AdmissionLayer, AdmissionService};
pub use registry::{Admission, ClientRegistry, IDLE_THRESHOLD, REAPER_PERIOD};
