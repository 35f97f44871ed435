use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::rpc::error::{app_error_to_rpc, RpcError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("internal error")]
    Internal { code: &'static str, message: String },
    #[error("method not allowed: {method}")]
    MethodNotAllowed { method: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }

    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
        }
    }

    /// Diagnostic detail for logs. Never part of a client-visible payload.
    pub fn detail(&self) -> String {
        match self {
            Self::Internal { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::MethodNotAllowed { method } => (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(ErrorResponse {
                    code: "method_not_allowed".to_string(),
                    message: format!("Method \"{method}\" not allowed."),
                    details: json!({}),
                }),
            )
                .into_response(),
            // transport failures on the rpc path still answer in JSON-RPC shape
            other => {
                let error = app_error_to_rpc("", other);
                (StatusCode::OK, Json(error.to_response(None))).into_response()
            }
        }
    }
}
