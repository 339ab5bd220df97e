//! Authentication token issuance.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bulwark_core::validation::{validate_email, validate_password_plaintext};
use bulwark_core::Validator;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{decode_json, AppState, RawBody};
use crate::error::AppError;
use crate::traits::TokenScope;

/// Lifetime of an authentication token.
pub const AUTHENTICATION_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// Exchanges email and password for a bearer token.
///
/// Unknown emails and wrong passwords get the same 401.
pub async fn create_authentication_token_handler(
    State(state): State<AppState>,
    body: RawBody,
) -> Result<impl IntoResponse, AppError> {
    let input: Credentials = decode_json(body)?;

    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    if !v.valid() {
        return Err(AppError::validation(v));
    }

    let user = state
        .users
        .get_by_email(&input.email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;
    if !state.users.password_matches(user.id, &input.password).await? {
        return Err(AppError::InvalidCredentials);
    }

    let token = state
        .tokens
        .issue(user.id, AUTHENTICATION_TOKEN_TTL, TokenScope::Authentication)
        .await?;
    info!(id = user.id, "authentication token issued");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": token })),
    ))
}
