use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::middleware::DispatchRoute;

/// Middleware that logs HTTP requests at INFO level, including which
/// middleware branch served them.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed();
    let route = response
        .extensions()
        .get::<DispatchRoute>()
        .map_or("-", DispatchRoute::as_str);

    tracing::info!(
        method = %method,
        path = %path,
        route = %route,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "HTTP request"
    );

    response
}
