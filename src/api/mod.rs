//! HTTP surface. Every route answers JSON; a wrong method gets a JSON 405
//! instead of axum's empty one.

pub mod dto;
pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/health",
            get(handlers::health).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/traits",
            post(handlers::traits).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/prompt",
            post(handlers::prompt).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/v1/image",
            post(handlers::image).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/narrative",
            post(handlers::narrative).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/compose",
            post(handlers::compose).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/persona",
            post(handlers::persona).fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
}

pub fn app(state: AppState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
