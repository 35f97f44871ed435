use std::time::Instant;

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// How the JSON-RPC endpoint answered, judged from the HTTP status.
pub fn reply_kind(status: StatusCode) -> &'static str {
    match status {
        StatusCode::OK => "reply",
        StatusCode::NO_CONTENT => "suppressed",
        StatusCode::METHOD_NOT_ALLOWED => "rejected",
        _ => "other",
    }
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_bytes = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        request_bytes = ?request_bytes,
        reply = reply_kind(status),
        duration_ms = elapsed_ms,
        "request summary"
    );

    if status == StatusCode::METHOD_NOT_ALLOWED {
        warn!(method = %method, path = %path, "rejected non-write http method");
    }

    response
}
