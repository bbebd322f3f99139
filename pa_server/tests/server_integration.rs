//! Integration tests for the HTTP surface.
//!
//! Requests are driven through the router with `oneshot`, backed by
//! in-memory stores and a transport that captures delivered codes.

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use pa_server::api::{AppState, create_router, request_id::REQUEST_ID_HEADER};
use phone_auth::AuthResult;
use phone_auth::auth::{
    AuthBackends, AuthConfig, AuthManager, JwtConfig, PasswordAlgorithm, build_hasher,
};
use phone_auth::otp::OtpTransport;
use phone_auth::security::RateLimitRule;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt; // For `oneshot` method

const SECRET: &str = "server_integration_secret_at_least_32_chars";
const PHONE: &str = "+989123456789";
const PASSWORD: &str = "password123456";
const CLIENT: [u8; 4] = [198, 51, 100, 4];
const PROXY: [u8; 4] = [10, 0, 0, 2];

#[derive(Default)]
struct Inbox {
    codes: Mutex<HashMap<String, String>>,
}

impl Inbox {
    async fn last_code(&self, phone: &str) -> String {
        self.codes
            .lock()
            .await
            .get(phone)
            .cloned()
            .expect("No code delivered")
    }
}

#[async_trait]
impl OtpTransport for Inbox {
    async fn send(&self, phone: &str, code: &str) -> AuthResult<()> {
        self.codes
            .lock()
            .await
            .insert(phone.to_string(), code.to_string());
        Ok(())
    }
}

/// Helper to create a test server over in-memory stores
fn create_test_server() -> (Router, Arc<Inbox>) {
    create_test_server_with(AuthConfig::default(), &[])
}

fn create_test_server_with(
    config: AuthConfig,
    trusted_proxies: &[IpAddr],
) -> (Router, Arc<Inbox>) {
    let inbox = Arc::new(Inbox::default());
    let hasher = build_hasher(&PasswordAlgorithm::Bcrypt { cost: 4 }).unwrap();
    let backends =
        AuthBackends::in_memory(&JwtConfig::new(SECRET), hasher, inbox.clone(), &config.otp)
            .unwrap();

    let state = AppState {
        auth_manager: Arc::new(AuthManager::new(backends, config)),
        database: None,
        trusted_proxies: trusted_proxies.into(),
    };

    (create_router(state), inbox)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    post_from(CLIENT, uri, body)
}

/// POST arriving over a connection from `peer`
fn post_from(peer: [u8; 4], uri: &str, body: Value) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
    request
}

fn login_body(n: usize) -> Value {
    json!({"phone": format!("+9891234567{n:02}"), "password": PASSWORD})
}

fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// Verify `PHONE` over HTTP
async fn verify_phone(app: &Router, inbox: &Inbox) {
    let (status, body) = send(
        app,
        post(
            "/auth/send-otp",
            json!({"phone": PHONE, "purpose": "phone_verify", "channel": "sms"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], true);
    assert_eq!(body["expiresInSec"], 300);

    let code = inbox.last_code(PHONE).await;
    let (status, body) = send(
        app,
        post(
            "/auth/verify-otp",
            json!({"phone": PHONE, "code": code, "purpose": "phone_verify"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let (app, _) = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
}

// ============================================================================
// Flow Tests
// ============================================================================

#[tokio::test]
async fn test_full_flow_over_http() {
    let (app, inbox) = create_test_server();
    verify_phone(&app, &inbox).await;

    let (status, body) = send(
        &app,
        post(
            "/auth/register",
            json!({"phone": PHONE, "password": PASSWORD, "displayName": "Sara"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "user");
    assert_eq!(body["isPhoneVerified"], true);
    assert!(body.get("accessToken").is_none());
    let user_id = body["userId"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        post("/auth/login", json!({"phone": PHONE, "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accessTokenExpiresIn"], 900);
    assert_eq!(body["user"]["id"], user_id);
    let access = body["accessToken"].as_str().unwrap().to_string();
    let refresh = body["refreshToken"].as_str().unwrap().to_string();

    let (status, body) = send(&app, authed("GET", "/auth/me", &access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], user_id);
    assert_eq!(body["phone"], PHONE);

    let (status, body) = send(
        &app,
        post("/auth/refresh", json!({"refreshToken": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = body["accessToken"].as_str().unwrap().to_string();
    assert_ne!(body["refreshToken"].as_str().unwrap(), refresh);

    // The rotated-out session no longer authenticates
    let (status, _) = send(&app, authed("GET", "/auth/me", &access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, authed("POST", "/auth/logout", &new_access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(&app, authed("GET", "/auth/me", &new_access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_with_auto_login() {
    let (app, inbox) = create_test_server();
    verify_phone(&app, &inbox).await;

    let (status, body) = send(
        &app,
        post(
            "/auth/register",
            json!({"phone": PHONE, "password": PASSWORD, "role": "vendor", "autoLogin": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "vendor");

    let access = body["accessToken"].as_str().unwrap();
    let (status, body) = send(&app, authed("POST", "/auth/logout-all", access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 1);
}

#[tokio::test]
async fn test_refresh_token_reuse_rejected() {
    let (app, inbox) = create_test_server();
    verify_phone(&app, &inbox).await;
    send(
        &app,
        post("/auth/register", json!({"phone": PHONE, "password": PASSWORD})),
    )
    .await;

    let (_, body) = send(
        &app,
        post("/auth/login", json!({"phone": PHONE, "password": PASSWORD})),
    )
    .await;
    let refresh = body["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        post("/auth/refresh", json!({"refreshToken": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        post("/auth/refresh", json!({"refreshToken": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

// ============================================================================
// Error Shape Tests
// ============================================================================

#[tokio::test]
async fn test_register_without_verified_phone_forbidden() {
    let (app, _) = create_test_server();

    let (status, body) = send(
        &app,
        post("/auth/register", json!({"phone": PHONE, "password": PASSWORD})),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_wrong_code_returns_invalid_otp() {
    let (app, inbox) = create_test_server();
    send(
        &app,
        post("/auth/send-otp", json!({"phone": PHONE, "purpose": "login"})),
    )
    .await;
    let code = inbox.last_code(PHONE).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let (status, body) = send(
        &app,
        post(
            "/auth/verify-otp",
            json!({"phone": PHONE, "code": wrong, "purpose": "login"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_otp");
}

#[tokio::test]
async fn test_unknown_phone_and_wrong_password_look_alike() {
    let (app, inbox) = create_test_server();
    verify_phone(&app, &inbox).await;
    send(
        &app,
        post("/auth/register", json!({"phone": PHONE, "password": PASSWORD})),
    )
    .await;

    let (unknown_status, unknown_body) = send(
        &app,
        post(
            "/auth/login",
            json!({"phone": "+14155550123", "password": PASSWORD}),
        ),
    )
    .await;
    let (wrong_status, wrong_body) = send(
        &app,
        post(
            "/auth/login",
            json!({"phone": PHONE, "password": "not-the-password"}),
        ),
    )
    .await;

    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, wrong_status);
    assert_eq!(unknown_body, wrong_body);
}

#[tokio::test]
async fn test_login_rate_limited() {
    let (app, _) = create_test_server();

    for _ in 0..5 {
        let (status, _) = send(
            &app,
            post("/auth/login", json!({"phone": PHONE, "password": PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = send(
        &app,
        post("/auth/login", json!({"phone": PHONE, "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
}

#[tokio::test]
async fn test_spoofed_forwarded_for_does_not_escape_ip_limit() {
    let mut config = AuthConfig::default();
    config.rate_limits.login_per_ip = RateLimitRule::new(3, 900);
    let (app, _) = create_test_server_with(config, &[]);

    // A different phone and forged address on every attempt
    for n in 0..4 {
        let mut request = post("/auth/login", login_body(n));
        request.headers_mut().insert(
            "x-forwarded-for",
            format!("203.0.113.{n}").parse().unwrap(),
        );
        let (status, body) = send(&app, request).await;
        if n < 3 {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        } else {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(body["error"], "rate_limited");
        }
    }
}

#[tokio::test]
async fn test_trusted_proxy_forwards_client_address() {
    let mut config = AuthConfig::default();
    config.rate_limits.login_per_ip = RateLimitRule::new(1, 900);
    let (app, _) = create_test_server_with(config, &[IpAddr::from(PROXY)]);

    let behind_proxy = |n: usize, client: &str| {
        let mut request = post_from(PROXY, "/auth/login", login_body(n));
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        request
    };

    // Buckets are per forwarded client, not per proxy
    let (status, _) = send(&app, behind_proxy(0, "203.0.113.1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, behind_proxy(1, "203.0.113.2")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, behind_proxy(2, "203.0.113.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_invalid_phone_rejected() {
    let (app, _) = create_test_server();

    let (status, body) = send(
        &app,
        post(
            "/auth/send-otp",
            json!({"phone": "09123456789", "purpose": "phone_verify"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_malformed_json_request() {
    let (app, _) = create_test_server();

    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{invalid json"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let (app, _) = create_test_server();

    let request = Request::builder()
        .uri("/auth/me")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&app, authed("POST", "/auth/logout", "not.a.jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_404_for_invalid_endpoint() {
    let (app, _) = create_test_server();

    let request = Request::builder()
        .uri("/auth/nonexistent")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Middleware Tests
// ============================================================================

#[tokio::test]
async fn test_request_id_echoed() {
    let (app, _) = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "trace-abc-123")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "trace-abc-123"
    );

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn test_cors_headers_present() {
    let (app, _) = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );
}
