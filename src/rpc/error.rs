//! JSON-RPC error codes and error objects
//!
//! Holds the reserved code table and the construction rules for
//! implementation-defined server error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::errors::AppError;
use crate::rpc::response::Response;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Bounds (inclusive) of the implementation-defined server error band.
pub const SERVER_ERROR_MIN: i64 = -32099;
pub const SERVER_ERROR_MAX: i64 = -32000;

const DEFAULT_SERVER_ERROR_MESSAGE: &str = "Server error";

pub fn reserved_message(code: i64) -> Option<&'static str> {
    match code {
        PARSE_ERROR => Some("Parse error"),
        INVALID_REQUEST => Some("Invalid Request"),
        METHOD_NOT_FOUND => Some("Method not found"),
        INVALID_PARAMS => Some("Invalid params"),
        INTERNAL_ERROR => Some("Internal error"),
        _ => None,
    }
}

pub fn is_server_error_code(code: i64) -> bool {
    (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("jsonrpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Error for `code` carrying its default message.
    ///
    /// Codes that are neither reserved nor inside the server error band
    /// cannot be represented and degrade to an internal error.
    pub fn new(code: i64) -> Self {
        Self::build(code, None)
    }

    /// Like [`RpcError::new`], with a custom message replacing the default.
    pub fn with_message(code: i64, message: impl Into<String>) -> Self {
        Self::build(code, Some(message.into()))
    }

    fn build(code: i64, message: Option<String>) -> Self {
        let default_message = match reserved_message(code) {
            Some(message) => message,
            None if is_server_error_code(code) => DEFAULT_SERVER_ERROR_MESSAGE,
            None => {
                warn!(code, "refusing to build jsonrpc error with disallowed code");
                return Self::internal_error();
            }
        };

        Self {
            code,
            message: message.unwrap_or_else(|| default_message.to_string()),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR)
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST)
    }

    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND)
    }

    pub fn invalid_params() -> Self {
        Self::new(INVALID_PARAMS)
    }

    pub fn internal_error() -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: "Internal error".to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Wraps the error into a response echoing `id` (`null` when unknown).
    pub fn to_response(&self, id: Option<Value>) -> Response {
        Response::error(id, self.clone())
    }
}

/// Maps a failure raised while serving a request onto the wire error.
///
/// JSON-RPC errors pass through untouched. Anything else is logged and
/// replaced by a bare internal error so no detail reaches the client.
pub fn app_error_to_rpc(method: &str, err: AppError) -> RpcError {
    match err {
        AppError::Rpc(rpc_error) => rpc_error,
        other => {
            error!(method = %method, error = %other.detail(), "jsonrpc handler failed");
            RpcError::internal_error()
        }
    }
}
