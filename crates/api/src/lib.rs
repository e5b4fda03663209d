//! axum HTTP/JSON surface over `inkcache-core` and `inkcache-jobs`,
//! implementing the read and admin routes. Construction of the
//! component graph happens once in `bin/inkcached`; this crate only
//! wires `ApiState` into a `Router`.

pub mod error;
pub mod routes;
pub mod state;

pub use state::ApiState;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the full app router, with handlers nested under a `/api` prefix.
pub fn app(state: ApiState) -> Router {
    Router::new()
        .nest("/api", routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
