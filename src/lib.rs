pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

use crate::{
    state::AppState,
    utils::middleware::{auth_middleware, rate_limit_middleware, request_id_middleware, RequestId},
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method, Request, StatusCode},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

/// multipart 表单除文件外的额外开销
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// 构建完整的应用路由
pub fn create_app(app_state: Arc<AppState>) -> Router {
    let config = &app_state.config;

    let api = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest("/api/user", routes::users::router())
        .nest("/api/social", routes::social_router())
        .layer(middleware::from_fn_with_state(app_state.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(app_state.clone(), rate_limit_middleware))
        .layer(DefaultBodyLimit::max(config.max_upload_size + MULTIPART_OVERHEAD));

    Router::new()
        .merge(api)
        .nest_service(&config.media_url, ServeDir::new(&config.media_root))
        .layer(cors_layer(&config.cors_allowed_origins))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map(|id| id.0.as_str())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        }))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(app_state)
}

/// 配置 CORS，`*` 表示允许任意来源
fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    if allowed_origins.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(origins)
}

async fn health_check(State(app_state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match app_state.db.verify_connection().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "environment": app_state.config.environment,
            })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        ),
    }
}
