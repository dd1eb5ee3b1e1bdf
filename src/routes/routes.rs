//! Defines routes for the vault API.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz` — liveness
//!   - `GET  /readyz`  — record store + blob store readiness
//!
//! - **Vault**
//!   - `POST /vault/create`              — multipart upload of text or a file
//!   - `GET  /vault/{id}?password=`      — item metadata and text content
//!   - `GET  /vault/{id}/download?password=` — stream the attached file

use crate::{
    config::AppConfig,
    handlers::{
        health_handlers::{healthz, readyz},
        vault_handlers::{create_vault, download_vault, get_vault},
    },
    services::vault_service::VaultService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the router for all vault routes.
///
/// The router carries shared state (`VaultService`) to all handlers.
pub fn routes() -> Router<VaultService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/vault/create", post(create_vault))
        .route("/vault/{id}", get(get_vault))
        .route("/vault/{id}/download", get(download_vault))
}

/// Routes plus state and the middleware stack: body limit, CORS, tracing.
pub fn app(service: VaultService, cfg: &AppConfig) -> Router {
    routes()
        .with_state(service)
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(cors_layer(cfg.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let allow_origin = match origins {
        None => AllowOrigin::from(Any),
        Some(list) => {
            let values = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("ignoring invalid CORS origin `{}`", origin);
                        None
                    }
                })
                .collect::<Vec<_>>();
            AllowOrigin::list(values)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
