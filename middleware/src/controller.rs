//! Root controller contract.

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;

/// Handles requests below the configured controller prefix.
///
/// `parts` holds the path segments left after stripping the prefix, so
/// `/controllers/grid/rows` reaches the root controller with
/// `["grid", "rows"]`.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn proc_url(&self, request: Request, parts: Vec<String>) -> Response;
}

/// Split the part of a path following the controller prefix into segments.
///
/// Segments are separated by `/`, not by the `_` older widget controllers
/// used, so `/controllers/grid_rows` reaches the controller as the single
/// segment `grid_rows`. An empty remainder yields no segments.
pub fn split_segments(remainder: &str) -> Vec<String> {
    if remainder.is_empty() {
        return Vec::new();
    }
    remainder.split('/').map(String::from).collect()
}
