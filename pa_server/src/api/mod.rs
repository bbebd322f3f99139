//! HTTP API for phone OTP authentication.
//!
//! # Modules
//!
//! - [`auth`]: OTP, registration, login, refresh, and logout handlers
//! - [`middleware`]: Bearer authentication for protected endpoints
//! - [`request_id`]: Request id propagation and access logging
//! - [`error`]: JSON error bodies
//!
//! # Endpoints Overview
//!
//! ## Public
//! - `POST /auth/send-otp` - Issue a one-time code
//! - `POST /auth/verify-otp` - Check a one-time code
//! - `POST /auth/register` - Register on a verified phone
//! - `POST /auth/login` - Login with phone and password
//! - `POST /auth/refresh` - Rotate a refresh token
//! - `GET /health` - Server health status
//!
//! ## Bearer token required
//! - `POST /auth/logout` - Revoke the current session
//! - `POST /auth/logout-all` - Revoke every session of the account
//! - `GET /auth/me` - Identity behind the token
//!
//! # CORS
//!
//! CORS is configured permissively. Put the server behind a proxy that
//! restricts origins in production.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod request_id;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use phone_auth::{AuthManager, db::Database};
use serde_json::json;
use std::{net::IpAddr, sync::Arc};
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
    /// Present when running against PostgreSQL
    pub database: Option<Database>,
    /// Peers allowed to report the client address in `X-Forwarded-For`
    pub trusted_proxies: Arc<[IpAddr]>,
}

/// Create the API router with all endpoints and middleware.
///
/// ```rust,no_run
/// # use pa_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/send-otp", post(auth::send_otp))
        .route("/auth/verify-otp", post(auth::verify_otp))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh_token));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/me", get(auth::me))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(public_routes)
        .merge(protected_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage is reachable, `503 Service Unavailable`
/// otherwise. In-memory deployments are always healthy.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","version":"1.0.0","storage":"postgres","database":true,"timestamp":"..."}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, db_healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
