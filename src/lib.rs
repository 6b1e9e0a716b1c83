pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::services::{
    auth::JwtKeys,
    payment::PaymentService,
    seat_lock::{RedisLockStore, SeatLockService},
};

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub locks: SeatLockService<RedisLockStore>,
    pub payments: PaymentService,
    pub jwt: JwtKeys,
    pub config: config::Config,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::connect(&config.database)
            .await
            .context("failed to connect to database")?;
        db.migrate().await.context("failed to run migrations")?;

        let redis = redis_client::RedisClient::connect(&config.redis)
            .await
            .context("failed to connect to Redis")?;
        info!("Redis connected");

        let cache = cache::CacheService::new(redis.clone(), db.clone(), config.features.enable_cache);
        let locks = SeatLockService::new(
            RedisLockStore::new(redis.clone()),
            Duration::from_secs(config.booking.seat_lock_ttl_seconds),
        );
        let payments = PaymentService::new(db.pool.clone(), config.booking.payment_intent_ttl_minutes);
        let jwt = JwtKeys::new(&config.jwt.secret, config.jwt.expires_in_hours);

        Ok(Arc::new(Self {
            db,
            redis,
            cache,
            locks,
            payments,
            jwt,
            config,
        }))
    }
}

/// Full HTTP surface: probes at the root, the API under `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.app.cors_origins);

    Router::new()
        .route("/", get(|| async { "Cinema Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(ready))
        .nest("/api", controllers::routes(&state.config.features))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

// GET /ready
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (db, redis) = tokio::join!(state.db.ping(), state.redis.ping());
    if let Err(e) = &db {
        warn!("Readiness: database unavailable: {:?}", e);
    }
    if let Err(e) = &redis {
        warn!("Readiness: redis unavailable: {:?}", e);
    }

    let (status, summary) = if db.is_ok() && redis.is_ok() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    let label = |ok: bool| if ok { "up" } else { "down" };

    (
        status,
        Json(serde_json::json!({
            "status": summary,
            "database": label(db.is_ok()),
            "redis": label(redis.is_ok()),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_accepts_wildcard_and_explicit_lists() {
        let _ = cors_layer(&["*".into()]);
        let _ = cors_layer(&[]);
        let _ = cors_layer(&[
            "http://localhost:3000".into(),
            "https://cinema.example.com".into(),
            "bad\nheader".into(),
        ]);
    }
}
