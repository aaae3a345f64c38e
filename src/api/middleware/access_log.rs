//! Access logging middleware.
//!
//! Logs every API request with method, path, and response status.
//! Entity mutations are audited durably by the record store; this is
//! operator-facing request telemetry only, and it never includes
//! request bodies (they may contain medical free text).

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let started = std::time::Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "api request"
    );
    response
}
