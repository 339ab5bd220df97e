//! Record storage for the server.
//!
//! The store traits live in [`crate::traits`]; this module holds their
//! implementations:
//!
//! - [`MemoryMovieStore`], [`MemoryUserStore`], [`MemoryTokenStore`],
//!   [`MemoryPermissionStore`]: `DashMap`-backed
//! - `PostgresMovieStore` (feature `postgres`): `sqlx` over a connection pool

pub mod engines;

pub use engines::*;
