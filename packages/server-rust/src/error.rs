//! Client-facing error type and its HTTP rendering.

use std::collections::BTreeMap;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bulwark_core::Validator;
use serde_json::json;
use tracing::error;

use crate::concurrency::OccError;

/// Errors a handler or middleware can return to the caller.
///
/// Every variant renders as `{"error": ...}` with the matching status code.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("failed validation")]
    FailedValidation(BTreeMap<String, String>),
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("invalid or missing authentication token")]
    InvalidAuthenticationToken,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    InactiveAccount,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    #[must_use]
    pub fn validation(v: Validator) -> Self {
        Self::FailedValidation(v.into_errors())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::EditConflict => StatusCode::CONFLICT,
            Self::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::InvalidAuthenticationToken
            | Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::InactiveAccount | Self::NotPermitted => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OccError> for AppError {
    fn from(err: OccError) -> Self {
        match err {
            OccError::EditConflict { .. } => Self::EditConflict,
            OccError::NotFound { .. } => Self::NotFound,
            OccError::Storage(e) => Self::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let challenge = matches!(self, Self::InvalidAuthenticationToken);
        let body = match self {
            Self::FailedValidation(errors) => json!({ "error": errors }),
            Self::Internal(err) => {
                error!(error = %format!("{err:#}"), "request failed");
                json!({
                    "error": "the server encountered a problem and could not process your request"
                })
            }
            other => json!({ "error": other.to_string() }),
        };
        let mut response = (status, Json(body)).into_response();
        if challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::EditConflict.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::FailedValidation(BTreeMap::new()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_failures_split_between_401_and_403() {
        for err in [
            AppError::InvalidCredentials,
            AppError::InvalidAuthenticationToken,
            AppError::AuthenticationRequired,
        ] {
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{err}");
        }
        assert_eq!(AppError::InactiveAccount.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotPermitted.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn invalid_token_carries_bearer_challenge() {
        let response = AppError::InvalidAuthenticationToken.into_response();
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        let response = AppError::AuthenticationRequired.into_response();
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn occ_errors_map_to_distinct_responses() {
        let conflict: AppError = OccError::EditConflict { id: 1, expected: 2 }.into();
        let missing: AppError = OccError::NotFound { id: 1 }.into();
        assert!(matches!(conflict, AppError::EditConflict));
        assert!(matches!(missing, AppError::NotFound));
    }

    #[tokio::test]
    async fn internal_error_hides_cause() {
        let response = AppError::Internal(anyhow::anyhow!("db password wrong")).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("password"));
        assert!(text.contains("could not process your request"));
    }
}
