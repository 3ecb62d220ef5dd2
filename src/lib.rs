pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;
pub mod store;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::AppState;

pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/users/me", get(handlers::auth::me))
        .route(
            "/images",
            post(handlers::images::enhance).get(handlers::images::list_images),
        )
        .route("/images/:id", get(handlers::images::preview))
        .route("/images/:id/hd", get(handlers::images::download_hd))
        .route("/admin/users", get(handlers::admin::list_users))
        .route("/admin/users/:id", delete(handlers::admin::delete_user))
        .route("/admin/users/:id/role", put(handlers::admin::set_role))
        .route("/admin/users/:id/tokens", post(handlers::admin::grant_tokens))
        .route("/admin/users/:id/balance", put(handlers::admin::set_balance))
        .route("/admin/usage", get(handlers::admin::usage_stats))
        .route("/admin/audit", get(handlers::admin::audit_log));

    // Multipart framing needs headroom beyond the raw file limit.
    let body_limit = state.config.max_file_size + 64 * 1024;

    Router::new()
        .route("/health", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
