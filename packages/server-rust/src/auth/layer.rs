//! Tower middleware that resolves the request's [`Principal`].
//!
//! Without an `Authorization` header the request continues as
//! [`Principal::Anonymous`]. A header that is not a well-formed, live
//! `Bearer` authentication token ends the request with 401.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::{header, HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use bulwark_core::validation::validate_token_plaintext;
use bulwark_core::Validator;
use tower::{Layer, Service};

use super::principal::Principal;
use crate::error::AppError;
use crate::traits::{TokenScope, TokenStore, UserStore};

/// Looks up the caller behind an `Authorization` header value.
///
/// # Errors
///
/// [`AppError::InvalidAuthenticationToken`] for malformed, unknown or expired
/// tokens; [`AppError::Internal`] when a store fails.
pub async fn resolve_principal(
    tokens: &dyn TokenStore,
    users: &dyn UserStore,
    authorization: Option<&HeaderValue>,
) -> Result<Principal, AppError> {
    let Some(value) = authorization else {
        return Ok(Principal::Anonymous);
    };

    let raw = value
        .to_str()
        .map_err(|_| AppError::InvalidAuthenticationToken)?;
    let token = match raw.split(' ').collect::<Vec<_>>().as_slice() {
        ["Bearer", token] => *token,
        _ => return Err(AppError::InvalidAuthenticationToken),
    };

    let mut v = Validator::new();
    validate_token_plaintext(&mut v, token);
    if !v.valid() {
        return Err(AppError::InvalidAuthenticationToken);
    }

    let user_id = tokens
        .user_id_for(TokenScope::Authentication, token)
        .await?
        .ok_or(AppError::InvalidAuthenticationToken)?;
    let user = users
        .get(user_id)
        .await?
        .ok_or(AppError::InvalidAuthenticationToken)?;
    Ok(Principal::User(user))
}

fn vary_on_authorization(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

// ---------------------------------------------------------------------------
// AuthenticateLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthenticateLayer {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserStore>,
}

impl AuthenticateLayer {
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenStore>, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }
}

impl<S> Layer<S> for AuthenticateLayer {
    type Service = AuthenticateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticateService {
            inner,
            tokens: Arc::clone(&self.tokens),
            users: Arc::clone(&self.users),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthenticateService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthenticateService<S> {
    inner: S,
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserStore>,
}

impl<S, B> Service<Request<B>> for AuthenticateService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // The ready service moves into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tokens = Arc::clone(&self.tokens);
        let users = Arc::clone(&self.users);

        Box::pin(async move {
            let authorization = req.headers().get(header::AUTHORIZATION).cloned();
            let principal =
                match resolve_principal(tokens.as_ref(), users.as_ref(), authorization.as_ref())
                    .await
                {
                    Ok(principal) => principal,
                    Err(err) => return Ok(vary_on_authorization(err.into_response())),
                };

            req.extensions_mut().insert(principal);
            let response = inner.call(req).await?;
            Ok(vary_on_authorization(response))
        })
    }
}
