pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

pub use config::Config;
use services::{MutationHook, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub hook: Arc<MutationHook>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn UserStore>, hook: MutationHook, config: Config) -> Self {
        Self {
            store,
            hook: Arc::new(hook),
            config: Arc::new(config),
        }
    }
}

/// The full HTTP surface. Shared by the server binary and the integration tests.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/info", get(handlers::info))
        .route("/webhooks/:topic", post(handlers::receive_webhook))
        .route(
            "/api/users",
            get(handlers::users::index).post(handlers::users::store),
        )
        .route("/api/users/search", post(handlers::users::search))
        .route(
            "/api/users/:id",
            get(handlers::users::show)
                .put(handlers::users::update)
                .patch(handlers::users::update)
                .delete(handlers::users::destroy),
        )
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
