//! User registration and activation.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bulwark_core::validation::{validate_token_plaintext, validate_user};
use bulwark_core::{Validator, MOVIES_READ};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{decode_json, AppState, RawBody};
use crate::background::Notification;
use crate::error::AppError;
use crate::traits::{ConditionalWrite, TokenScope, UserStoreError};

/// Lifetime of the activation token sent in the welcome notification.
pub const ACTIVATION_TOKEN_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActivateUser {
    #[serde(default)]
    token: String,
}

/// Registers a user and hands the welcome notification to the dispatcher.
///
/// New users get `movies:read` and an activation token that travels in the
/// notification. Responds 202 as soon as the user is stored; delivery
/// happens off the request path and its outcome never reaches this response.
pub async fn register_user_handler(
    State(state): State<AppState>,
    body: RawBody,
) -> Result<impl IntoResponse, AppError> {
    let input: RegisterUser = decode_json(body)?;

    let mut v = Validator::new();
    validate_user(&mut v, &input.name, &input.email, &input.password);
    if !v.valid() {
        return Err(AppError::validation(v));
    }

    let user = match state
        .users
        .insert(&input.name, &input.email, &input.password)
        .await
    {
        Ok(user) => user,
        Err(UserStoreError::DuplicateEmail) => {
            v.add_error("email", "a user with this email address already exists");
            return Err(AppError::validation(v));
        }
        Err(UserStoreError::Backend(err)) => return Err(AppError::Internal(err)),
    };
    info!(id = user.id, "user registered");

    state.permissions.add_for_user(user.id, &[MOVIES_READ]).await?;
    let token = state
        .tokens
        .issue(user.id, ACTIVATION_TOKEN_TTL, TokenScope::Activation)
        .await?;

    let delivery = Arc::clone(&state.delivery);
    let notification = Notification::welcome(&user, &token.plaintext);
    state.dispatcher.run("welcome_notification", async move {
        delivery.send(&notification).await?;
        Ok(())
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

/// Activates the account an activation token belongs to.
///
/// The write is version-checked; every activation token the user holds is
/// revoked afterwards.
pub async fn activate_user_handler(
    State(state): State<AppState>,
    body: RawBody,
) -> Result<impl IntoResponse, AppError> {
    let input: ActivateUser = decode_json(body)?;

    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &input.token);
    if !v.valid() {
        return Err(AppError::validation(v));
    }

    let owner = state
        .tokens
        .user_id_for(TokenScope::Activation, &input.token)
        .await?;
    let user = match owner {
        Some(id) => state.users.get(id).await?,
        None => None,
    };
    let Some(mut user) = user else {
        v.add_error("token", "invalid or expired activation token");
        return Err(AppError::validation(v));
    };

    match state.users.activate(user.id, user.version).await? {
        ConditionalWrite::Applied(version) => {
            user.activated = true;
            user.version = version;
        }
        ConditionalWrite::VersionMismatch => return Err(AppError::EditConflict),
        ConditionalWrite::NotFound => return Err(AppError::NotFound),
    }

    state
        .tokens
        .delete_all_for_user(TokenScope::Activation, user.id)
        .await?;
    info!(id = user.id, "user activated");

    Ok(Json(json!({ "user": user })))
}
