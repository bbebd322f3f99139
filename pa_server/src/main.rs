//! Phone OTP authentication server.
//!
//! Serves the auth flows over HTTP, backed by PostgreSQL (or in-memory
//! stores) and a Redis or in-process rate limiter.

use std::sync::Arc;

use anyhow::Error;
use pa_server::{
    api,
    config::{CliOverrides, ServerConfig},
    logging, maintenance, metrics,
};
use phone_auth::{
    AuthBackends, AuthManager,
    auth::{TokenService, build_hasher},
    db::{Database, PgSessionStore, PgUserRepository},
    otp::{LogTransport, OtpTransport, PgOtpLedger},
    security::{FixedWindowRateLimiter, RateLimiter, SlidingWindowRateLimiter},
};
use pico_args::Arguments;
use tracing::{info, warn};

const HELP: &str = "\
Run the phone OTP authentication server

USAGE:
  pa_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]
  --redis-url  URL         Redis URL for shared rate limits  [default: env REDIS_URL]

FLAGS:
  --in-memory              Keep users, codes, and sessions in process memory
  -h, --help               Print help information

ENVIRONMENT:
  JWT_SECRET               Token signing secret (required, 32+ characters)
  PASSWORD_ALGORITHM       argon2id or bcrypt
  OTP_DIGITS, OTP_TTL_SECS, OTP_MAX_ATTEMPTS
  RATE_LIMIT_<FLOW>_ATTEMPTS, RATE_LIMIT_<FLOW>_WINDOW_SECS
                           e.g. RATE_LIMIT_LOGIN_PHONE_ATTEMPTS=5
  TRUSTED_PROXIES          Comma-separated proxy IPs whose X-Forwarded-For is honored
  LOG_FORMAT               pretty or json
  METRICS_BIND             Prometheus exporter address
  (See .env file for all configuration options)
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let overrides = CliOverrides {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        redis_url: pargs.opt_value_from_str("--redis-url")?,
        in_memory: pargs.contains("--in-memory"),
    };

    let config = ServerConfig::from_env(overrides)?;

    logging::init(config.log_format);
    info!("Starting phone auth server at {}", config.bind);

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        info!("Prometheus metrics exposed at http://{addr}/metrics");
    }

    let hasher = build_hasher(&config.password)?;
    info!("Password hashing: {}", hasher.algorithm());
    let transport: Arc<dyn OtpTransport> = Arc::new(LogTransport);

    let (mut backends, database) = if config.in_memory {
        warn!("Running with in-memory stores; all state is lost on exit");
        let backends =
            AuthBackends::in_memory(&config.jwt, hasher, transport, &config.auth.otp)?;
        (backends, None)
    } else {
        info!("Connecting to database");
        let db = Database::new(&config.database)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
        info!("Database connected successfully");

        let pool = Arc::new(db.pool().clone());
        let sessions = Arc::new(PgSessionStore::new(pool.clone()));
        let backends = AuthBackends {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            otp: Arc::new(PgOtpLedger::with_max_attempts(
                pool,
                config.auth.otp.max_attempts,
            )),
            transport,
            hasher,
            limiter: Arc::new(FixedWindowRateLimiter::new()),
            tokens: Arc::new(TokenService::new(&config.jwt, sessions)?),
        };
        (backends, Some(db))
    };

    if let Some(url) = &config.redis_url {
        match SlidingWindowRateLimiter::connect(url).await {
            Ok(limiter) => {
                info!("Rate limits shared through Redis");
                backends.limiter = Arc::new(limiter) as Arc<dyn RateLimiter>;
            }
            Err(e) => warn!(error = %e, "Redis unavailable, using in-process rate limits"),
        }
    }

    let auth_manager = Arc::new(AuthManager::new(backends, config.auth.clone()));
    let cleanup = maintenance::spawn_cleanup(auth_manager.clone(), config.cleanup_interval);

    let app = api::create_router(api::AppState {
        auth_manager,
        database: database.clone(),
        trusted_proxies: config.trusted_proxies.clone().into(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Shutting down server...");
    cleanup.abort();
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C; shutting down");
    }
}
