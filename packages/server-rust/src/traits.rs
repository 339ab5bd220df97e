use std::time::Duration;

use async_trait::async_trait;
use bulwark_core::{Filters, Movie, MovieFields, Permissions, RecordId, User, Version};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a version-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalWrite {
    /// Exactly one record matched; carries the new stored version.
    Applied(Version),
    /// The record exists but its stored version differs from the expected one.
    VersionMismatch,
    /// No record with the given id exists.
    NotFound,
}

/// Storage primitive the optimistic concurrency coordinator relies on.
///
/// `conditional_update` must be atomic: apply `fields` and bump the version
/// by one only if the stored version equals `expected`.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// The mutable payload written by a conditional update.
    type Fields: Send + Sync;

    async fn conditional_update(
        &self,
        id: RecordId,
        expected: Version,
        fields: &Self::Fields,
    ) -> anyhow::Result<ConditionalWrite>;
}

/// Title/genre search plus pagination for listing movies.
#[derive(Debug, Clone, Default)]
pub struct MovieQuery {
    /// Case-insensitive substring match on the title. Empty matches all.
    pub title: String,
    /// Every listed genre must be present on the movie.
    pub genres: Vec<String>,
    pub filters: Filters,
}

/// Persistence for movie records.
/// Implementations: in-memory (`DashMap`), `PostgreSQL` (feature `postgres`).
#[async_trait]
pub trait MovieStore: VersionedStore<Fields = MovieFields> {
    /// Insert a new record with version 1 and return it with its assigned id.
    async fn insert(&self, fields: MovieFields) -> anyhow::Result<Movie>;

    /// Load a record by id, ignoring versions.
    async fn get(&self, id: RecordId) -> anyhow::Result<Option<Movie>>;

    /// Return one page of matching records plus the total match count.
    async fn list(&self, query: &MovieQuery) -> anyhow::Result<(Vec<Movie>, usize)>;

    /// Unconditionally delete a record. Returns `false` if it did not exist.
    async fn delete(&self, id: RecordId) -> anyhow::Result<bool>;

    /// One-time initialization (e.g., create tables).
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Errors from registering a user.
#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("duplicate email")]
    DuplicateEmail,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence for user accounts.
///
/// Implementations keep only a digest of the password.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Creates an unactivated user at version 1.
    async fn insert(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, UserStoreError>;

    async fn get(&self, id: RecordId) -> anyhow::Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Checks `password` against the one stored for user `id`.
    async fn password_matches(&self, id: RecordId, password: &str) -> anyhow::Result<bool>;

    /// Marks the user activated if its stored version is still `expected`.
    async fn activate(&self, id: RecordId, expected: Version)
        -> anyhow::Result<ConditionalWrite>;
}

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    Activation,
    Authentication,
}

/// A freshly issued token. The plaintext exists only in this value; stores
/// keep its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub user_id: RecordId,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: TokenScope,
}

/// Issues and resolves scoped, expiring tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn issue(
        &self,
        user_id: RecordId,
        ttl: Duration,
        scope: TokenScope,
    ) -> anyhow::Result<IssuedToken>;

    /// Returns the owner of an unexpired token with this scope.
    async fn user_id_for(
        &self,
        scope: TokenScope,
        plaintext: &str,
    ) -> anyhow::Result<Option<RecordId>>;

    async fn delete_all_for_user(&self, scope: TokenScope, user_id: RecordId)
        -> anyhow::Result<()>;
}

/// Permission codes per user.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn all_for_user(&self, user_id: RecordId) -> anyhow::Result<Permissions>;

    async fn add_for_user(&self, user_id: RecordId, codes: &[&str]) -> anyhow::Result<()>;
}
