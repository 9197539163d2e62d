use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, connection_details};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router
///
/// - `GET /` health check
/// - `GET /connection-details` credential endpoint for session clients
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route(
            "/connection-details",
            get(connection_details::connection_details),
        )
        .layer(TraceLayer::new_for_http())
}
