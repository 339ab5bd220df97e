//! In-memory stores backed by [`DashMap`]: movies, users, tokens and
//! permission grants.
//!
//! Conditional writes compare and bump the version while holding the entry's
//! shard guard, which makes them atomic with respect to every other writer
//! in the process.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bulwark_core::{
    ClockSource, Movie, MovieFields, Permissions, RecordId, SortDirection, User, Version,
    INITIAL_VERSION,
};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::auth::{digest, digest_matches, generate_token, SecretDigest};
use crate::traits::{
    ConditionalWrite, IssuedToken, MovieQuery, MovieStore, PermissionStore, TokenScope,
    TokenStore, UserStore, UserStoreError, VersionedStore,
};

/// Movie store held entirely in process memory.
pub struct MemoryMovieStore {
    movies: DashMap<RecordId, Movie>,
    next_id: AtomicI64,
    clock: Arc<dyn ClockSource>,
}

impl MemoryMovieStore {
    /// Creates an empty store. Ids start at 1.
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            movies: DashMap::new(),
            next_id: AtomicI64::new(1),
            clock,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.movies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}

fn matches_query(movie: &Movie, title: &str, genres: &[String]) -> bool {
    let title_ok =
        title.is_empty() || movie.fields.title.to_lowercase().contains(&title.to_lowercase());
    let genres_ok = genres.iter().all(|g| movie.fields.genres.contains(g));
    title_ok && genres_ok
}

fn compare_by(column: &str, a: &Movie, b: &Movie) -> CmpOrdering {
    match column {
        "title" => a.fields.title.cmp(&b.fields.title),
        "year" => a.fields.year.cmp(&b.fields.year),
        "runtime" => a.fields.runtime.cmp(&b.fields.runtime),
        _ => a.id.cmp(&b.id),
    }
}

#[async_trait]
impl VersionedStore for MemoryMovieStore {
    type Fields = MovieFields;

    async fn conditional_update(
        &self,
        id: RecordId,
        expected: Version,
        fields: &MovieFields,
    ) -> anyhow::Result<ConditionalWrite> {
        let Some(mut movie) = self.movies.get_mut(&id) else {
            return Ok(ConditionalWrite::NotFound);
        };
        if movie.version != expected {
            return Ok(ConditionalWrite::VersionMismatch);
        }

        let next = movie
            .version
            .checked_add(1)
            .ok_or_else(|| anyhow!("version counter exhausted for movie {id}"))?;
        movie.fields = fields.clone();
        movie.version = next;
        Ok(ConditionalWrite::Applied(next))
    }
}

#[async_trait]
impl MovieStore for MemoryMovieStore {
    async fn insert(&self, fields: MovieFields) -> anyhow::Result<Movie> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let movie = Movie {
            id,
            created_at: self.clock.now(),
            fields,
            version: INITIAL_VERSION,
        };
        self.movies.insert(id, movie.clone());
        Ok(movie)
    }

    async fn get(&self, id: RecordId) -> anyhow::Result<Option<Movie>> {
        Ok(self.movies.get(&id).map(|m| m.value().clone()))
    }

    async fn list(&self, query: &MovieQuery) -> anyhow::Result<(Vec<Movie>, usize)> {
        let mut matching: Vec<Movie> = self
            .movies
            .iter()
            .filter(|m| matches_query(m.value(), &query.title, &query.genres))
            .map(|m| m.value().clone())
            .collect();

        let column = query.filters.sort_column().unwrap_or("id");
        let direction = query.filters.sort_direction();
        matching.sort_by(|a, b| {
            let primary = compare_by(column, a, b);
            let primary = match direction {
                SortDirection::Ascending => primary,
                SortDirection::Descending => primary.reverse(),
            };
            primary.then_with(|| a.id.cmp(&b.id))
        });

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(query.filters.offset())
            .take(query.filters.limit())
            .collect();
        Ok((page, total))
    }

    async fn delete(&self, id: RecordId) -> anyhow::Result<bool> {
        Ok(self.movies.remove(&id).is_some())
    }
}

struct StoredUser {
    user: User,
    password: SecretDigest,
}

/// User store held in process memory.
///
/// Emails are unique case-insensitively. The email index entry is held
/// while a new user is written, so two registrations for one address cannot
/// both succeed.
pub struct MemoryUserStore {
    users: DashMap<RecordId, StoredUser>,
    emails: DashMap<String, RecordId>,
    next_id: AtomicI64,
    clock: Arc<dyn ClockSource>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            next_id: AtomicI64::new(1),
            clock,
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, UserStoreError> {
        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(_) => Err(UserStoreError::DuplicateEmail),
            Entry::Vacant(slot) => {
                let user = User {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    created_at: self.clock.now(),
                    name: name.to_string(),
                    email: email.to_string(),
                    activated: false,
                    version: INITIAL_VERSION,
                };
                self.users.insert(
                    user.id,
                    StoredUser {
                        user: user.clone(),
                        password: digest(password),
                    },
                );
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn get(&self, id: RecordId) -> anyhow::Result<Option<User>> {
        Ok(self.users.get(&id).map(|stored| stored.user.clone()))
    }

    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let Some(id) = self.emails.get(&email.to_lowercase()).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn password_matches(&self, id: RecordId, password: &str) -> anyhow::Result<bool> {
        Ok(self
            .users
            .get(&id)
            .is_some_and(|stored| digest_matches(&stored.password, password)))
    }

    async fn activate(
        &self,
        id: RecordId,
        expected: Version,
    ) -> anyhow::Result<ConditionalWrite> {
        let Some(mut stored) = self.users.get_mut(&id) else {
            return Ok(ConditionalWrite::NotFound);
        };
        if stored.user.version != expected {
            return Ok(ConditionalWrite::VersionMismatch);
        }
        stored.user.activated = true;
        stored.user.version = expected + 1;
        Ok(ConditionalWrite::Applied(stored.user.version))
    }
}

struct StoredToken {
    user_id: RecordId,
    expiry_ms: u64,
    scope: TokenScope,
}

/// Token store held in process memory, indexed by the token's digest.
pub struct MemoryTokenStore {
    tokens: DashMap<SecretDigest, StoredToken>,
    clock: Arc<dyn ClockSource>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            tokens: DashMap::new(),
            clock,
        }
    }

    /// Number of stored tokens, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn issue(
        &self,
        user_id: RecordId,
        ttl: Duration,
        scope: TokenScope,
    ) -> anyhow::Result<IssuedToken> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expiry_ms = self.clock.now().saturating_add(ttl_ms);
        let expiry = i64::try_from(expiry_ms)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| anyhow!("token expiry {expiry_ms}ms is out of range"))?;

        let plaintext = generate_token();
        self.tokens.insert(
            digest(&plaintext),
            StoredToken {
                user_id,
                expiry_ms,
                scope,
            },
        );
        Ok(IssuedToken {
            plaintext,
            user_id,
            expiry,
            scope,
        })
    }

    async fn user_id_for(
        &self,
        scope: TokenScope,
        plaintext: &str,
    ) -> anyhow::Result<Option<RecordId>> {
        let now = self.clock.now();
        Ok(self
            .tokens
            .get(&digest(plaintext))
            .filter(|token| token.scope == scope && token.expiry_ms > now)
            .map(|token| token.user_id))
    }

    async fn delete_all_for_user(
        &self,
        scope: TokenScope,
        user_id: RecordId,
    ) -> anyhow::Result<()> {
        self.tokens
            .retain(|_, token| !(token.scope == scope && token.user_id == user_id));
        Ok(())
    }
}

/// Permission grants held in process memory.
#[derive(Default)]
pub struct MemoryPermissionStore {
    grants: DashMap<RecordId, Permissions>,
}

impl MemoryPermissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn all_for_user(&self, user_id: RecordId) -> anyhow::Result<Permissions> {
        Ok(self
            .grants
            .get(&user_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: RecordId, codes: &[&str]) -> anyhow::Result<()> {
        let mut grants = self.grants.entry(user_id).or_default();
        for code in codes {
            grants.grant(code);
        }
        Ok(())
    }
}
