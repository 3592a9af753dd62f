pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
pub mod types;
pub mod utils;

use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Full HTTP surface: health is public, everything under `/api` else requires
/// an actor token.
pub fn app_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(handlers::health));

    let actor_routes = Router::new()
        .route("/api/changes", get(handlers::list_changes))
        .route("/api/changes/{id}", get(handlers::get_change))
        .route("/api/changes/{id}/undo", post(handlers::undo_change))
        .route("/api/quick-undo", get(handlers::list_quick_undo))
        .route("/api/quick-undo/{id}", post(handlers::perform_quick_undo))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(actor_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum_middleware::from_fn(middleware::request_id))
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                        .allow_headers(Any)
                        .max_age(std::time::Duration::from_secs(24 * 60 * 60)),
                ),
        )
        .with_state(state)
}
