//! End-to-end tests driving the assembled router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bulwark_core::{ClockSource, ManualClock, MOVIES_READ, MOVIES_WRITE};
use bulwark_server::admission::{AdmissionController, LimiterConfig};
use bulwark_server::background::{Notification, Notifier, NotifyError};
use bulwark_server::network::{NetworkConfig, NetworkModule, Services, MAX_BODY_BYTES};
use bulwark_server::storage::{
    MemoryMovieStore, MemoryPermissionStore, MemoryTokenStore, MemoryUserStore,
};
use bulwark_server::traits::{PermissionStore, TokenScope, TokenStore, UserStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

/// 2024-06-10T06:13:20Z
const NOW_MS: u64 = 1_718_000_000_000;

#[derive(Default)]
struct Recorder {
    fail: bool,
    attempts: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for Recorder {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.lock().push(notification.clone());
        if self.fail {
            Err(NotifyError::Rejected("mailbox unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

struct TestApp {
    router: Router,
    module: NetworkModule,
    notifier: Arc<Recorder>,
    users: Arc<MemoryUserStore>,
    tokens: Arc<MemoryTokenStore>,
    permissions: Arc<MemoryPermissionStore>,
    /// Bearer token of an activated user holding read and write.
    admin: String,
}

impl TestApp {
    /// Stores a user directly and returns a live authentication token.
    async fn user_with(&self, email: &str, activated: bool, codes: &[&str]) -> String {
        let user = self.users.insert("Tester", email, "pa55word").await.unwrap();
        if activated {
            self.users.activate(user.id, user.version).await.unwrap();
        }
        self.permissions.add_for_user(user.id, codes).await.unwrap();
        self.tokens
            .issue(user.id, Duration::from_secs(3600), TokenScope::Authentication)
            .await
            .unwrap()
            .plaintext
    }

    fn as_admin(&self, req: Request<Body>) -> Request<Body> {
        bearer(req, &self.admin)
    }
}

async fn app_with(limiter: LimiterConfig, notifier: Recorder) -> TestApp {
    let clock: Arc<dyn ClockSource> = Arc::new(ManualClock::new(NOW_MS));
    let notifier = Arc::new(notifier);
    let users = Arc::new(MemoryUserStore::new(Arc::clone(&clock)));
    let tokens = Arc::new(MemoryTokenStore::new(Arc::clone(&clock)));
    let permissions = Arc::new(MemoryPermissionStore::new());
    let services = Services {
        admission: Arc::new(AdmissionController::new(limiter, Arc::clone(&clock))),
        movies: Arc::new(MemoryMovieStore::new(Arc::clone(&clock))),
        users: Arc::clone(&users) as Arc<dyn UserStore>,
        tokens: Arc::clone(&tokens) as Arc<dyn TokenStore>,
        permissions: Arc::clone(&permissions) as Arc<dyn PermissionStore>,
        notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
        clock,
    };
    let module = NetworkModule::new(NetworkConfig::default(), services);
    let mut app = TestApp {
        router: module.build_router(),
        module,
        notifier,
        users,
        tokens,
        permissions,
        admin: String::new(),
    };
    app.admin = app
        .user_with("admin@example.com", true, &[MOVIES_READ, MOVIES_WRITE])
        .await;
    app
}

async fn app() -> TestApp {
    app_with(
        LimiterConfig {
            capacity: 10_000,
            ..LimiterConfig::default()
        },
        Recorder::default(),
    )
    .await
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn with_json(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn bearer(mut req: Request<Body>, token: &str) -> Request<Body> {
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    req
}

fn moana() -> Value {
    json!({
        "title": "Moana",
        "year": 2016,
        "runtime": "107 mins",
        "genres": ["animation", "adventure"]
    })
}

fn alice() -> Value {
    json!({ "name": "Alice", "email": "alice@example.com", "password": "pa55word" })
}

async fn create(app: &TestApp, body: &Value) -> Value {
    let req = app.as_admin(with_json(Method::POST, "/v1/movies", body));
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["movie"].clone()
}

#[tokio::test]
async fn healthcheck_reports_environment() {
    let app = app().await;
    let (status, _, body) = send(&app.router, get("/v1/healthcheck")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["system_info"]["environment"], "development");
    assert_eq!(body["background_tasks"], 0);
}

#[tokio::test]
async fn create_then_show() {
    let app = app().await;
    let req = app.as_admin(with_json(Method::POST, "/v1/movies", &moana()));
    let (status, headers, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers[header::LOCATION], "/v1/movies/1");
    assert_eq!(body["movie"]["version"], 1);
    assert_eq!(body["movie"]["runtime"], "107 mins");

    let (status, _, body) = send(&app.router, app.as_admin(get("/v1/movies/1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["movie"]["title"], "Moana");
}

#[tokio::test]
async fn invalid_movie_is_422_with_field_errors() {
    let app = app().await;
    let body = json!({ "title": "", "year": 2999, "runtime": "107 mins", "genres": [] });
    let req = app.as_admin(with_json(Method::POST, "/v1/movies", &body));
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"]["title"].is_string());
    assert!(json["error"]["year"].is_string());
    assert!(json["error"]["genres"].is_string());
}

#[tokio::test]
async fn malformed_or_unknown_json_is_400() {
    let app = app().await;
    let unknown = json!({ "title": "Moana", "rating": 5 });
    let req = app.as_admin(with_json(Method::POST, "/v1/movies", &unknown));
    let (status, _, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::post("/v1/movies")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"title\": "))
        .unwrap();
    let (status, _, json) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("badly-formed"));
}

#[tokio::test]
async fn bad_ids_and_unknown_routes_are_404() {
    let app = app().await;
    for uri in ["/v1/movies/0", "/v1/movies/-1", "/v1/movies/abc", "/v1/movies/99", "/nope"] {
        let (status, _, json) = send(&app.router, app.as_admin(get(uri))).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(json["error"], "the requested resource could not be found");
    }
}

#[tokio::test]
async fn patch_bumps_version_and_rejects_stale_expected_version() {
    let app = app().await;
    create(&app, &moana()).await;

    let mut req = with_json(Method::PATCH, "/v1/movies/1", &json!({ "year": 2017 }));
    req.headers_mut()
        .insert("x-expected-version", "1".parse().unwrap());
    let (status, _, body) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["movie"]["version"], 2);
    assert_eq!(body["movie"]["year"], 2017);
    assert_eq!(body["movie"]["title"], "Moana");

    // Another client still holding version 1 loses.
    let mut stale = with_json(Method::PATCH, "/v1/movies/1", &json!({ "year": 1999 }));
    stale
        .headers_mut()
        .insert("x-expected-version", "1".parse().unwrap());
    let (status, _, body) = send(&app.router, app.as_admin(stale)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"],
        "unable to update the record due to an edit conflict, please try again"
    );

    let (_, _, body) = send(&app.router, app.as_admin(get("/v1/movies/1"))).await;
    assert_eq!(body["movie"]["year"], 2017);
    assert_eq!(body["movie"]["version"], 2);
}

#[tokio::test]
async fn patch_without_expected_version_applies() {
    let app = app().await;
    create(&app, &moana()).await;

    let req = with_json(Method::PATCH, "/v1/movies/1", &json!({ "runtime": "110 mins" }));
    let (status, _, body) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["movie"]["runtime"], "110 mins");
    assert_eq!(body["movie"]["version"], 2);
}

#[tokio::test]
async fn patch_missing_movie_is_404() {
    let app = app().await;
    let req = with_json(Method::PATCH, "/v1/movies/5", &json!({ "year": 2000 }));
    let (status, _, _) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_then_missing() {
    let app = app().await;
    create(&app, &moana()).await;

    let req = Request::delete("/v1/movies/1").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "movie successfully deleted");

    let req = Request::delete("/v1/movies/1").body(Body::empty()).unwrap();
    let (status, _, _) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_sorts_and_paginates() {
    let app = app().await;
    create(&app, &moana()).await;
    create(
        &app,
        &json!({ "title": "Black Panther", "year": 2018, "runtime": 134, "genres": ["action", "adventure"] }),
    )
    .await;
    create(
        &app,
        &json!({ "title": "The Breakfast Club", "year": 1986, "runtime": 96, "genres": ["drama"] }),
    )
    .await;

    let req = get("/v1/movies?genres=adventure&sort=-year&page_size=1");
    let (status, _, body) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["movies"].as_array().unwrap().len(), 1);
    assert_eq!(body["movies"][0]["title"], "Black Panther");
    assert_eq!(body["metadata"]["total_records"], 2);
    assert_eq!(body["metadata"]["last_page"], 2);

    let (_, _, body) = send(&app.router, app.as_admin(get("/v1/movies?title=breakfast"))).await;
    assert_eq!(body["movies"][0]["title"], "The Breakfast Club");

    let (_, _, body) = send(&app.router, app.as_admin(get("/v1/movies?title=nothing"))).await;
    assert_eq!(body["movies"], json!([]));
    assert_eq!(body["metadata"], json!({}));
}

#[tokio::test]
async fn list_rejects_bad_filters() {
    let app = app().await;
    let req = get("/v1/movies?page=abc&page_size=500&sort=rating");
    let (status, _, body) = send(&app.router, app.as_admin(req)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["page"], "must be an integer value");
    assert!(body["error"]["page_size"].is_string());
    assert!(body["error"]["sort"].is_string());
}

#[tokio::test]
async fn burst_then_429_per_client() {
    let app = app_with(LimiterConfig::default(), Recorder::default()).await;
    let from = |ip: &str| {
        Request::get("/v1/healthcheck")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..4 {
        let (status, _, _) = send(&app.router, from("203.0.113.5")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _, body) = send(&app.router, from("203.0.113.5")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate limit exceeded");

    let (status, _, _) = send(&app.router, from("198.51.100.1")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn disabled_limiter_never_429s() {
    let app = app_with(
        LimiterConfig {
            enabled: false,
            ..LimiterConfig::default()
        },
        Recorder::default(),
    )
    .await;
    for _ in 0..20 {
        let (status, _, _) = send(&app.router, get("/v1/healthcheck")).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn register_dispatches_welcome_notification() {
    let app = app().await;
    let req = with_json(Method::POST, "/v1/users", &alice());
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["user"]["activated"], false);
    assert!(json["user"].get("password").is_none());

    assert!(app.module.dispatcher().wait_idle(Duration::from_secs(2)).await);
    let sent = app.notifier.attempts.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "alice@example.com");
    assert_eq!(sent[0].data["userID"], json["user"]["id"]);
    assert_eq!(sent[0].data["activationToken"].as_str().unwrap().len(), 26);
}

#[tokio::test]
async fn duplicate_email_is_422() {
    let app = app().await;
    send(&app.router, with_json(Method::POST, "/v1/users", &alice())).await;

    let again = json!({
        "name": "Other",
        "email": "ALICE@example.com",
        "password": "an0therpass"
    });
    let (status, _, json) = send(&app.router, with_json(Method::POST, "/v1/users", &again)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        json["error"]["email"],
        "a user with this email address already exists"
    );
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_never_reaches_the_client() {
    let app = app_with(
        LimiterConfig {
            capacity: 100,
            ..LimiterConfig::default()
        },
        Recorder {
            fail: true,
            ..Recorder::default()
        },
    )
    .await;
    let body = json!({ "name": "Bob", "email": "bob@example.com", "password": "pa55word" });
    let (status, _, _) = send(&app.router, with_json(Method::POST, "/v1/users", &body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    assert!(app.module.dispatcher().wait_idle(Duration::from_secs(5)).await);
    assert_eq!(app.notifier.attempts.lock().len(), 3);

    // The server keeps serving after the background failure.
    let (status, _, _) = send(&app.router, get("/v1/healthcheck")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn registration_validates_password_length() {
    let app = app().await;
    for (password, message) in [
        ("", "must be provided"),
        ("short", "must be at least 8 bytes long"),
    ] {
        let body = json!({ "name": "Alice", "email": "alice@example.com", "password": password });
        let (status, _, json) =
            send(&app.router, with_json(Method::POST, "/v1/users", &body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["password"], message);
    }

    let long = "x".repeat(73);
    let body = json!({ "name": "Alice", "email": "alice@example.com", "password": long });
    let (_, _, json) = send(&app.router, with_json(Method::POST, "/v1/users", &body)).await;
    assert_eq!(json["error"]["password"], "must not be more than 72 bytes long");
}

/// Register, activate with the mailed token, log in, then read movies.
#[tokio::test]
async fn activation_and_login_unlock_movie_reads() {
    let app = app().await;
    create(&app, &moana()).await;
    send(&app.router, with_json(Method::POST, "/v1/users", &alice())).await;
    assert!(app.module.dispatcher().wait_idle(Duration::from_secs(2)).await);
    let activation = app.notifier.attempts.lock()[0].data["activationToken"]
        .as_str()
        .unwrap()
        .to_string();

    let login = json!({ "email": "alice@example.com", "password": "pa55word" });
    let req = with_json(Method::POST, "/v1/tokens/authentication", &login);
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::CREATED);
    let token = json["authentication_token"]["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 26);
    assert!(json["authentication_token"]["expiry"].is_string());

    // Authenticated but not yet activated.
    let (status, _, json) = send(&app.router, bearer(get("/v1/movies/1"), &token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        json["error"],
        "your user account must be activated to access this resource"
    );

    let req = with_json(Method::PUT, "/v1/users/activated", &json!({ "token": activation }));
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["activated"], true);
    assert_eq!(json["user"]["version"], 2);

    let (status, _, json) = send(&app.router, bearer(get("/v1/movies/1"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["movie"]["title"], "Moana");

    // Activation tokens are single use.
    let req = with_json(Method::PUT, "/v1/users/activated", &json!({ "token": activation }));
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["token"], "invalid or expired activation token");
}

#[tokio::test]
async fn activation_token_must_be_well_formed() {
    let app = app().await;
    let req = with_json(Method::PUT, "/v1/users/activated", &json!({ "token": "abc" }));
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["token"], "must be 26 bytes long");
}

#[tokio::test]
async fn wrong_credentials_are_401() {
    let app = app().await;
    send(&app.router, with_json(Method::POST, "/v1/users", &alice())).await;

    for login in [
        json!({ "email": "alice@example.com", "password": "wr0ngpass" }),
        json!({ "email": "nobody@example.com", "password": "pa55word" }),
    ] {
        let req = with_json(Method::POST, "/v1/tokens/authentication", &login);
        let (status, _, json) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "invalid authentication credentials");
    }
}

#[tokio::test]
async fn anonymous_and_bad_tokens_cannot_read_movies() {
    let app = app().await;
    let (status, headers, json) = send(&app.router, get("/v1/movies")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::VARY], "Authorization");
    assert_eq!(
        json["error"],
        "you must be authenticated to access this resource"
    );

    let req = bearer(get("/v1/movies"), "ABCDEFGHIJKLMNOPQRSTUVWXYZ");
    let (status, headers, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(json["error"], "invalid or missing authentication token");
}

#[tokio::test]
async fn read_permission_does_not_allow_writes() {
    let app = app().await;
    let reader = app.user_with("reader@example.com", true, &[MOVIES_READ]).await;

    let (status, _, _) = send(&app.router, bearer(get("/v1/movies"), &reader)).await;
    assert_eq!(status, StatusCode::OK);

    let req = bearer(with_json(Method::POST, "/v1/movies", &moana()), &reader);
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        json["error"],
        "your user account doesn't have the necessary permissions to access this resource"
    );
}

#[tokio::test]
async fn oversized_body_is_400() {
    let app = app().await;
    let req = Request::post("/v1/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("x".repeat(MAX_BODY_BYTES + 1)))
        .unwrap();
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "body must not be larger than 1048576 bytes");
}
