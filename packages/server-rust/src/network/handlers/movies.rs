//! Movie CRUD handlers.
//!
//! Updates go through the [`OccCoordinator`](crate::concurrency::OccCoordinator):
//! the handler reads the record, applies the patch, and writes it back only
//! if nobody else wrote in between.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bulwark_core::clock::year_from_unix_millis;
use bulwark_core::filters::{calculate_metadata, validate_filters};
use bulwark_core::validation::validate_movie;
use bulwark_core::{Filters, MovieFields, Runtime, Validator};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{decode_json, parse_id, AppState, QueryReader, RawBody};
use crate::error::AppError;
use crate::traits::MovieQuery;

/// Header carrying the version the client last saw.
pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateMovie {
    #[serde(default)]
    title: String,
    #[serde(default)]
    year: i32,
    #[serde(default)]
    runtime: Runtime,
    #[serde(default)]
    genres: Vec<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchMovie {
    title: Option<String>,
    year: Option<i32>,
    runtime: Option<Runtime>,
    genres: Option<Vec<String>>,
}

impl PatchMovie {
    fn apply(self, mut fields: MovieFields) -> MovieFields {
        if let Some(title) = self.title {
            fields.title = title;
        }
        if let Some(year) = self.year {
            fields.year = year;
        }
        if let Some(runtime) = self.runtime {
            fields.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            fields.genres = genres;
        }
        fields
    }
}

fn validated(state: &AppState, fields: &MovieFields) -> Result<(), AppError> {
    let mut v = Validator::new();
    validate_movie(&mut v, fields, year_from_unix_millis(state.clock.now()));
    if v.valid() {
        Ok(())
    } else {
        Err(AppError::validation(v))
    }
}

pub async fn list_movies_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let reader = QueryReader::new(&params);
    let mut v = Validator::new();

    let defaults = Filters::default();
    let filters = Filters {
        page: reader.int("page", defaults.page, &mut v),
        page_size: reader.int("page_size", defaults.page_size, &mut v),
        sort: reader.string("sort", &defaults.sort),
        ..defaults
    };
    validate_filters(&mut v, &filters);
    if !v.valid() {
        return Err(AppError::validation(v));
    }

    let query = MovieQuery {
        title: reader.string("title", ""),
        genres: reader.csv("genres"),
        filters,
    };
    let (movies, total) = state.movies.list(&query).await?;
    let metadata = calculate_metadata(total, query.filters.page, query.filters.page_size);

    Ok(Json(json!({ "movies": movies, "metadata": metadata })))
}

pub async fn create_movie_handler(
    State(state): State<AppState>,
    body: RawBody,
) -> Result<impl IntoResponse, AppError> {
    let input: CreateMovie = decode_json(body)?;
    let fields = MovieFields {
        title: input.title,
        year: input.year,
        runtime: input.runtime,
        genres: input.genres,
    };
    validated(&state, &fields)?;

    let movie = state.movies.insert(fields).await?;
    info!(id = movie.id, "movie created");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/v1/movies/{}", movie.id))],
        Json(json!({ "movie": movie })),
    ))
}

pub async fn show_movie_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&raw_id)?;
    let movie = state.movies.get(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(json!({ "movie": movie })))
}

/// Applies a partial update under optimistic concurrency control.
///
/// If `X-Expected-Version` is present it must equal the version just read;
/// otherwise the write is checked against that read alone. A writer that
/// slips in between the read and the write also yields 409.
pub async fn update_movie_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: RawBody,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&raw_id)?;
    let current = state.movies.get(id).await?.ok_or(AppError::NotFound)?;

    if let Some(expected) = headers.get(EXPECTED_VERSION_HEADER) {
        let matches = expected
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .is_some_and(|v| v == current.version);
        if !matches {
            return Err(AppError::EditConflict);
        }
    }

    let patch: PatchMovie = decode_json(body)?;
    let fields = patch.apply(current.fields.clone());
    validated(&state, &fields)?;

    // Carries the version we read; the coordinator writes only if it is still current.
    let candidate = current.with_update(fields, current.version);
    let version = state.coordinator.update(&candidate).await?;
    let updated = candidate.with_update(candidate.fields.clone(), version);

    Ok(Json(json!({ "movie": updated })))
}

pub async fn delete_movie_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&raw_id)?;
    if !state.movies.delete(id).await? {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}
