//! API route modules.
//!
//! Organizes routes by resource type.

pub mod crawls;
pub mod health;
pub mod index;
pub mod logging;

use axum::{Router, routing::get};

use crate::api::middleware::TokenAuthLayer;
use crate::api::server::AppState;

/// Create the main router.
///
/// The web UI, the recent-jobs feed and health probes are public; everything
/// else requires the API token.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(crawls::protected_router())
        .nest("/api/logging", logging::router())
        .route_layer(TokenAuthLayer::new(state.api_token.clone()));

    Router::new()
        .route("/", get(index::index_page))
        .merge(crawls::public_router())
        .merge(protected)
        .nest("/health", health::router())
        .with_state(state)
}
