//! Per-route permission checks.
//!
//! Applied with `route_layer` so unmatched paths still fall through to 404.
//! The caller must be authenticated (401), activated (403) and hold the
//! route's permission code (403).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::Request;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use super::principal::Principal;
use crate::error::AppError;
use crate::traits::PermissionStore;

/// Checks that `principal` is an activated user holding `code`.
///
/// # Errors
///
/// 401 for anonymous callers, 403 for unactivated or unpermitted users,
/// 500 when the permission store fails.
pub async fn check_permission(
    permissions: &dyn PermissionStore,
    principal: &Principal,
    code: &str,
) -> Result<(), AppError> {
    let user = principal.require_activated()?;
    if permissions.all_for_user(user.id).await?.include(code) {
        Ok(())
    } else {
        Err(AppError::NotPermitted)
    }
}

// ---------------------------------------------------------------------------
// RequirePermissionLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RequirePermissionLayer {
    code: &'static str,
    permissions: Arc<dyn PermissionStore>,
}

impl RequirePermissionLayer {
    #[must_use]
    pub fn new(code: &'static str, permissions: Arc<dyn PermissionStore>) -> Self {
        Self { code, permissions }
    }
}

/// Shorthand for [`RequirePermissionLayer::new`].
#[must_use]
pub fn require_permission(
    code: &'static str,
    permissions: &Arc<dyn PermissionStore>,
) -> RequirePermissionLayer {
    RequirePermissionLayer::new(code, Arc::clone(permissions))
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            code: self.code,
            permissions: Arc::clone(&self.permissions),
        }
    }
}

// ---------------------------------------------------------------------------
// RequirePermissionService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    code: &'static str,
    permissions: Arc<dyn PermissionStore>,
}

impl<S, B> Service<Request<B>> for RequirePermissionService<S>
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

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let permissions = Arc::clone(&self.permissions);
        let code = self.code;
        let principal = req
            .extensions()
            .get::<Principal>()
            .cloned()
            .unwrap_or_default();

        Box::pin(async move {
            if let Err(err) = check_permission(permissions.as_ref(), &principal, code).await {
                return Ok(err.into_response());
            }
            inner.call(req).await
        })
    }
}
