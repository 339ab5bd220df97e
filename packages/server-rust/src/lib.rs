//! Bulwark Server: per-client admission control, token authentication,
//! optimistic concurrency for versioned records, and a fault-contained
//! background delivery lane, served over HTTP with axum.

pub mod admission;
pub mod auth;
pub mod background;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod network;
pub mod storage;
pub mod telemetry;
pub mod traits;

pub use admission::{Admission, AdmissionController, LimiterConfig};
pub use auth::Principal;
pub use background::{DeliveryRetrier, Dispatcher, Notification, Notifier};
pub use concurrency::{OccCoordinator, OccError};
pub use error::AppError;
pub use network::{NetworkConfig, NetworkModule, Services};
pub use traits::{
    ConditionalWrite, MovieStore, PermissionStore, TokenScope, TokenStore, UserStore,
    VersionedStore,
};
