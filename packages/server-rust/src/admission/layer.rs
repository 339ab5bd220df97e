//! Tower middleware that runs admission before any handler.
//!
//! Denied requests get a 429 without reaching the inner service.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use super::controller::AdmissionController;
use super::identity::client_identity;
use crate::error::AppError;

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AdmissionLayer {
    controller: Arc<AdmissionController>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            controller: Arc::clone(&self.controller),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    controller: Arc<AdmissionController>,
}

impl<S, B> Service<Request<B>> for AdmissionService<S>
where
    S: Service<Request<B>, Response = Response> + Send,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        if self.controller.is_enabled() {
            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr);
            let identity = client_identity(req.headers(), peer);

            if !self.controller.admit(&identity).is_allowed() {
                return Box::pin(async { Ok(AppError::RateLimited.into_response()) });
            }
        }

        Box::pin(self.inner.call(req))
    }
}
