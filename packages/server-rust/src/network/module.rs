//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` assembles shared state,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. Callers can read the bound port between `start()` and
//! `serve()`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post, put};
use axum::Router;
use bulwark_core::{ClockSource, MOVIES_READ, MOVIES_WRITE};
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    activate_user_handler, create_authentication_token_handler, create_movie_handler,
    delete_movie_handler, healthcheck_handler, list_movies_handler, register_user_handler,
    show_movie_handler, update_movie_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::admission::{AdmissionController, AdmissionLayer};
use crate::auth::{require_permission, AuthenticateLayer};
use crate::background::{DeliveryRetrier, Dispatcher, Notifier};
use crate::concurrency::OccCoordinator;
use crate::error::AppError;
use crate::traits::{MovieStore, PermissionStore, TokenStore, UserStore};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Collaborators the HTTP surface is built from.
pub struct Services {
    pub admission: Arc<AdmissionController>,
    pub movies: Arc<dyn MovieStore>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn ClockSource>,
}

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- builds the application state (dispatcher, coordinator, shutdown controller)
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- runs until the shutdown future resolves, then drains background work
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, services: Services) -> Self {
        let state = AppState {
            admission: services.admission,
            coordinator: OccCoordinator::new(Arc::clone(&services.movies)),
            movies: services.movies,
            users: services.users,
            tokens: services.tokens,
            permissions: services.permissions,
            dispatcher: Dispatcher::new(),
            delivery: Arc::new(DeliveryRetrier::new(services.notifier)),
            clock: services.clock,
            config: Arc::new(config.clone()),
            shutdown: Arc::new(ShutdownController::new()),
        };
        Self {
            config,
            listener: None,
            state,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        self.state.dispatcher.clone()
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /v1/healthcheck`
    /// - `GET /v1/movies`, `GET /v1/movies/{id}` (`movies:read`)
    /// - `POST /v1/movies`, `PATCH, DELETE /v1/movies/{id}` (`movies:write`)
    /// - `POST /v1/users`
    /// - `PUT /v1/users/activated`
    /// - `POST /v1/tokens/authentication`
    pub fn build_router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, env = %self.config.env, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves.
    ///
    /// The idle-client reaper runs for exactly as long as the listener does.
    /// After the listener closes, background tasks already dispatched get up
    /// to the configured shutdown timeout to finish; they are not cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .context("start() must be called before serve()")?;
        let state = self.state;
        let router = build_router(state.clone());

        state.admission.start();
        state.shutdown.set_ready();
        info!("serving HTTP connections");

        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        state.shutdown.trigger_shutdown();
        state.admission.stop().await;

        let pending = state.dispatcher.in_flight();
        if pending > 0 {
            info!(pending, "waiting for background tasks");
        }
        if state
            .dispatcher
            .wait_idle(self.config.shutdown_timeout)
            .await
        {
            info!("background tasks drained");
        } else {
            warn!(
                remaining = state.dispatcher.in_flight(),
                "shutdown timeout expired with background tasks still running"
            );
        }
        state.shutdown.set_stopped();

        served.map_err(Into::into)
    }
}

fn build_router(state: AppState) -> Router {
    let layers = build_http_layers(&state.config);
    let admission = AdmissionLayer::new(Arc::clone(&state.admission));
    let authenticate =
        AuthenticateLayer::new(Arc::clone(&state.tokens), Arc::clone(&state.users));

    // Guards sit on the routes so unmatched paths still reach the fallback.
    let read = Router::new()
        .route("/v1/movies", get(list_movies_handler))
        .route("/v1/movies/{id}", get(show_movie_handler))
        .route_layer(require_permission(MOVIES_READ, &state.permissions));
    let write = Router::new()
        .route("/v1/movies", post(create_movie_handler))
        .route(
            "/v1/movies/{id}",
            patch(update_movie_handler).delete(delete_movie_handler),
        )
        .route_layer(require_permission(MOVIES_WRITE, &state.permissions));

    Router::new()
        .route("/v1/healthcheck", get(healthcheck_handler))
        .route("/v1/users", post(register_user_handler))
        .route("/v1/users/activated", put(activate_user_handler))
        .route(
            "/v1/tokens/authentication",
            post(create_authentication_token_handler),
        )
        .merge(read)
        .merge(write)
        .fallback(|| async { AppError::NotFound })
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(authenticate)
        .layer(admission)
        .layer(layers)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use bulwark_core::SystemClock;

    use super::*;
    use crate::admission::LimiterConfig;
    use crate::background::LogNotifier;
    use crate::network::HealthState;
    use crate::storage::{
        MemoryMovieStore, MemoryPermissionStore, MemoryTokenStore, MemoryUserStore,
    };

    fn services() -> Services {
        let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
        Services {
            admission: Arc::new(AdmissionController::new(
                LimiterConfig::default(),
                Arc::clone(&clock),
            )),
            movies: Arc::new(MemoryMovieStore::new(Arc::clone(&clock))),
            users: Arc::new(MemoryUserStore::new(Arc::clone(&clock))),
            tokens: Arc::new(MemoryTokenStore::new(Arc::clone(&clock))),
            permissions: Arc::new(MemoryPermissionStore::new()),
            notifier: Arc::new(LogNotifier),
            clock,
        }
    }

    fn ephemeral() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = NetworkModule::new(ephemeral(), services());
        assert!(module.listener.is_none());
        let _router = module.build_router();
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = NetworkModule::new(ephemeral(), services());
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = NetworkModule::new(ephemeral(), services());
        let err = module.serve(std::future::ready(())).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_runs_reaper_until_shutdown() {
        let services = services();
        let admission = Arc::clone(&services.admission);
        let mut module = NetworkModule::new(ephemeral(), services);
        let shutdown_ctrl = module.shutdown_controller();
        module.start().await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async move {
            let _ = rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(admission.registry().is_reaper_running());
        assert_eq!(shutdown_ctrl.health_state(), HealthState::Ready);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!admission.registry().is_reaper_running());
        assert_eq!(shutdown_ctrl.health_state(), HealthState::Stopped);
    }
}
