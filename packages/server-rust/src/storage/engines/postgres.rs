//! `PostgreSQL` movie store (feature `postgres`).
//!
//! The conditional update is one `UPDATE ... WHERE id = $ AND version = $`
//! statement, so the database row lock serializes competing writers across
//! processes. A zero-row result is followed by an `EXISTS` query to tell
//! a missing row from a stale version.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bulwark_core::{Movie, MovieFields, RecordId, Runtime, Version};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use crate::traits::{ConditionalWrite, MovieQuery, MovieStore, VersionedStore};

/// Upper bound on any single statement.
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

const MOVIE_COLUMNS: &str = "id, (EXTRACT(EPOCH FROM created_at) * 1000)::BIGINT AS created_at_ms, \
     title, year, runtime, genres, version";

/// Movie store backed by a `PostgreSQL` connection pool.
#[derive(Clone)]
pub struct PostgresMovieStore {
    pool: PgPool,
}

impl PostgresMovieStore {
    /// Opens a pool and verifies connectivity within five seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the DSN is invalid or the database is unreachable.
    pub async fn connect(dsn: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        info!("database connection pool established");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn bounded<T>(fut: impl Future<Output = Result<T, sqlx::Error>>) -> anyhow::Result<T> {
    tokio::time::timeout(QUERY_TIMEOUT, fut)
        .await
        .map_err(|_| anyhow!("query timed out after {QUERY_TIMEOUT:?}"))?
        .map_err(Into::into)
}

fn movie_from_row(row: &PgRow) -> anyhow::Result<Movie> {
    let created_at_ms: i64 = row.try_get("created_at_ms")?;
    let version: i32 = row.try_get("version")?;
    Ok(Movie {
        id: row.try_get("id")?,
        created_at: u64::try_from(created_at_ms)?,
        fields: MovieFields {
            title: row.try_get("title")?,
            year: row.try_get("year")?,
            runtime: Runtime(row.try_get("runtime")?),
            genres: row.try_get("genres")?,
        },
        version: Version::try_from(version)?,
    })
}

#[async_trait]
impl VersionedStore for PostgresMovieStore {
    type Fields = MovieFields;

    async fn conditional_update(
        &self,
        id: RecordId,
        expected: Version,
        fields: &MovieFields,
    ) -> anyhow::Result<ConditionalWrite> {
        let expected_db = i32::try_from(expected)?;
        let updated = bounded(
            sqlx::query(
                "UPDATE movies \
                 SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1 \
                 WHERE id = $5 AND version = $6 \
                 RETURNING version",
            )
            .bind(&fields.title)
            .bind(fields.year)
            .bind(fields.runtime.0)
            .bind(&fields.genres)
            .bind(id)
            .bind(expected_db)
            .fetch_optional(&self.pool),
        )
        .await?;

        if let Some(row) = updated {
            let version: i32 = row.try_get("version")?;
            return Ok(ConditionalWrite::Applied(Version::try_from(version)?));
        }

        let exists: bool = bounded(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM movies WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool),
        )
        .await?;

        Ok(if exists {
            ConditionalWrite::VersionMismatch
        } else {
            ConditionalWrite::NotFound
        })
    }
}

#[async_trait]
impl MovieStore for PostgresMovieStore {
    async fn insert(&self, fields: MovieFields) -> anyhow::Result<Movie> {
        let sql = format!(
            "INSERT INTO movies (title, year, runtime, genres) VALUES ($1, $2, $3, $4) \
             RETURNING {MOVIE_COLUMNS}"
        );
        let row = bounded(
            sqlx::query(&sql)
                .bind(&fields.title)
                .bind(fields.year)
                .bind(fields.runtime.0)
                .bind(&fields.genres)
                .fetch_one(&self.pool),
        )
        .await?;
        movie_from_row(&row)
    }

    async fn get(&self, id: RecordId) -> anyhow::Result<Option<Movie>> {
        if id < 1 {
            return Ok(None);
        }
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1");
        let row = bounded(sqlx::query(&sql).bind(id).fetch_optional(&self.pool)).await?;
        row.as_ref().map(movie_from_row).transpose()
    }

    async fn list(&self, query: &MovieQuery) -> anyhow::Result<(Vec<Movie>, usize)> {
        // The column comes from the sort safelist, never from raw input.
        let column = query.filters.sort_column().unwrap_or("id");
        let direction = match query.filters.sort_direction() {
            bulwark_core::SortDirection::Ascending => "ASC",
            bulwark_core::SortDirection::Descending => "DESC",
        };
        let sql = format!(
            "SELECT count(*) OVER() AS total, {MOVIE_COLUMNS} FROM movies \
             WHERE ($1 = '' OR title ILIKE '%' || $1 || '%') \
             AND (genres @> $2 OR $2 = '{{}}') \
             ORDER BY {column} {direction}, id ASC \
             LIMIT $3 OFFSET $4"
        );
        let rows = bounded(
            sqlx::query(&sql)
                .bind(&query.title)
                .bind(&query.genres)
                .bind(i64::try_from(query.filters.limit())?)
                .bind(i64::try_from(query.filters.offset())?)
                .fetch_all(&self.pool),
        )
        .await?;

        let total = match rows.first() {
            Some(row) => usize::try_from(row.try_get::<i64, _>("total")?)?,
            None => 0,
        };
        let movies = rows.iter().map(movie_from_row).collect::<anyhow::Result<_>>()?;
        Ok((movies, total))
    }

    async fn delete(&self, id: RecordId) -> anyhow::Result<bool> {
        if id < 1 {
            return Ok(false);
        }
        let result = bounded(
            sqlx::query("DELETE FROM movies WHERE id = $1")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        bounded(
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS movies ( \
                     id bigserial PRIMARY KEY, \
                     created_at timestamp(0) with time zone NOT NULL DEFAULT NOW(), \
                     title text NOT NULL, \
                     year integer NOT NULL, \
                     runtime integer NOT NULL CHECK (runtime >= 0), \
                     genres text[] NOT NULL, \
                     version integer NOT NULL DEFAULT 1 \
                 )",
            )
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
