//! HTTP handler definitions for the Bulwark server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors), the request-decoding helpers the handlers share, and
//! re-exports all handler functions for building the router.

pub mod health;
pub mod movies;
pub mod tokens;
pub mod users;

pub use health::healthcheck_handler;
pub use movies::{
    create_movie_handler, delete_movie_handler, list_movies_handler, show_movie_handler,
    update_movie_handler,
};
pub use tokens::create_authentication_token_handler;
pub use users::{activate_user_handler, register_user_handler};

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use bulwark_core::{ClockSource, RecordId, Validator};
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use super::{NetworkConfig, ShutdownController, MAX_BODY_BYTES};
use crate::admission::AdmissionController;
use crate::background::{DeliveryRetrier, Dispatcher, Notifier};
use crate::concurrency::OccCoordinator;
use crate::error::AppError;
use crate::traits::{MovieStore, PermissionStore, TokenStore, UserStore};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub movies: Arc<dyn MovieStore>,
    /// Version-checked writes against `movies`.
    pub coordinator: OccCoordinator<dyn MovieStore>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub dispatcher: Dispatcher,
    pub delivery: Arc<DeliveryRetrier<dyn Notifier>>,
    pub clock: Arc<dyn ClockSource>,
    pub config: Arc<NetworkConfig>,
    pub shutdown: Arc<ShutdownController>,
}

/// Parses a path id. Anything that is not an integer >= 1 is treated as
/// a missing record.
pub(crate) fn parse_id(raw: &str) -> Result<RecordId, AppError> {
    raw.parse::<RecordId>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or(AppError::NotFound)
}

/// Request body as extracted by handlers. Buffering failures, including the
/// body limit, are turned into 400s by [`decode_json`].
pub(crate) type RawBody = Result<Bytes, BytesRejection>;

/// Decodes a JSON request body, rejecting unknown fields via the target type.
pub(crate) fn decode_json<T: DeserializeOwned>(body: RawBody) -> Result<T, AppError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::BadRequest(format!(
                "body must not be larger than {MAX_BODY_BYTES} bytes"
            ))
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    })?;
    parse_json(&body)
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("body must not be empty".to_string()));
    }

    serde_json::from_slice(body).map_err(|err| {
        let message = match err.classify() {
            Category::Syntax | Category::Eof => format!(
                "body contains badly-formed JSON (at line {} column {})",
                err.line(),
                err.column()
            ),
            Category::Data => format!("body contains invalid data: {err}"),
            Category::Io => "body could not be read".to_string(),
        };
        AppError::BadRequest(message)
    })
}

/// Query-string readers that record parse failures in a [`Validator`].
pub(crate) struct QueryReader<'a> {
    params: &'a HashMap<String, String>,
}

impl<'a> QueryReader<'a> {
    pub(crate) fn new(params: &'a HashMap<String, String>) -> Self {
        Self { params }
    }

    pub(crate) fn string(&self, key: &str, default: &str) -> String {
        self.params
            .get(key)
            .filter(|v| !v.is_empty())
            .map_or_else(|| default.to_string(), Clone::clone)
    }

    /// Comma-separated list; empty entries are dropped.
    pub(crate) fn csv(&self, key: &str) -> Vec<String> {
        self.params
            .get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn int(&self, key: &str, default: usize, v: &mut Validator) -> usize {
        match self.params.get(key).filter(|s| !s.is_empty()) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                v.add_error(key, "must be an integer value");
                default
            }),
        }
    }
}
