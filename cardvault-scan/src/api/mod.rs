//! HTTP API handlers for cardvault-scan

pub mod batches;
pub mod collections;
pub mod health;
pub mod scan;
pub mod uploads;

pub use batches::batch_routes;
pub use collections::collection_routes;
pub use health::health_routes;
pub use scan::scan_routes;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Remember the most recent server error for `/health`
pub async fn track_last_error(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let summary = format!("{} {} returned {}", method, path, response.status());
        *state.last_error.write().await = Some(summary);
    }

    response
}
