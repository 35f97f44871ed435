//! Axum HTTP handlers for the web server
//!
//! Provides the JSON-RPC endpoint and a health probe.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;

use crate::errors::AppError;
use crate::rpc::RpcError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn jsonrpc_endpoint(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(error = %rejection, "jsonrpc request body could not be read");
            return AppError::Rpc(RpcError::parse_error()).into_response();
        }
    };

    match state.engine.respond(&body).await {
        Some(reply) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            reply,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn method_not_allowed(method: Method) -> AppError {
    AppError::method_not_allowed(method.as_str())
}
