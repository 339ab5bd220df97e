//! HTTP surface: configuration, middleware, handlers, lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use handlers::AppState;
pub use module::{NetworkModule, Services, MAX_BODY_BYTES};
pub use shutdown::*;
