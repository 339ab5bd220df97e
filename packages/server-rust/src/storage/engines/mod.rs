//! Concrete store implementations.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryMovieStore, MemoryPermissionStore, MemoryTokenStore, MemoryUserStore};
#[cfg(feature = "postgres")]
pub use postgres::PostgresMovieStore;
