//! Request validation
//!
//! Validation runs in two phases. [`validate_format`] checks the envelope
//! of a single request object, [`validate_params`] checks it against the
//! registry. Neither phase has side effects.

use serde_json::{Map, Value};
use tracing::debug;

use crate::rpc::{
    context::ExecutionContext,
    error::RpcError,
    registry::{MethodDescriptor, MethodKind, MethodRegistry},
    response::JSONRPC_VERSION,
};

/// Keys every request object must carry.
pub const REQUIRED_KEYS: [&str; 2] = ["jsonrpc", "method"];
/// Keys a request object may carry.
pub const ALLOWED_KEYS: [&str; 4] = ["jsonrpc", "method", "params", "id"];

#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Absent,
    Named(Map<String, Value>),
    /// Any non-object value, bound as a single argument.
    Positional(Value),
}

impl Params {
    fn from_field(value: Option<&Value>) -> Self {
        match value {
            None => Self::Absent,
            Some(Value::Object(map)) => Self::Named(map.clone()),
            Some(other) => Self::Positional(other.clone()),
        }
    }
}

/// Typed view of a request object.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Params,
    pub id: Option<Value>,
}

impl Request {
    pub fn from_object(object: &Map<String, Value>) -> Result<Self, RpcError> {
        let method = object
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(RpcError::method_not_found)?;

        Ok(Self {
            method: method.to_string(),
            params: Params::from_field(object.get("params")),
            id: object.get("id").cloned(),
        })
    }
}

pub fn validate_format(object: &Map<String, Value>) -> Result<(), RpcError> {
    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            debug!(key, "jsonrpc request is missing a required key");
            return Err(RpcError::invalid_request());
        }
    }

    if let Some(key) = object
        .keys()
        .find(|key| !ALLOWED_KEYS.contains(&key.as_str()))
    {
        debug!(key = %key, "jsonrpc request carries a key that is not allowed");
        return Err(RpcError::invalid_request());
    }

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        debug!("jsonrpc request version must be \"2.0\"");
        return Err(RpcError::invalid_request());
    }

    Ok(())
}

/// Checks method, id and params of an object that passed [`validate_format`].
pub fn validate_params<'r, C>(
    object: &Map<String, Value>,
    registry: &'r MethodRegistry<C>,
) -> Result<&'r MethodDescriptor<C>, RpcError>
where
    C: ExecutionContext + 'static,
{
    let Some(descriptor) = object
        .get("method")
        .and_then(Value::as_str)
        .and_then(|method| registry.resolve(method))
    else {
        debug!(method = ?object.get("method"), "jsonrpc method not found");
        return Err(RpcError::method_not_found());
    };

    let has_id = object.contains_key("id");
    match descriptor.kind() {
        MethodKind::Notification if has_id => {
            debug!(method = descriptor.name(), "notification must not carry an id");
            return Err(RpcError::invalid_params());
        }
        MethodKind::Standard if !has_id => {
            debug!(method = descriptor.name(), "request needs an id");
            return Err(RpcError::invalid_params());
        }
        _ => {}
    }

    let required = descriptor.required_params();
    match object.get("params") {
        None if !required.is_empty() => {
            debug!(
                method = descriptor.name(),
                required = required.len(),
                "params missing for method with required parameters"
            );
            Err(RpcError::invalid_params())
        }
        None => Ok(descriptor),
        Some(Value::Object(params)) => {
            if let Some(missing) = required.iter().find(|name| !params.contains_key(*name)) {
                debug!(method = descriptor.name(), key = %missing, "required parameter is missing");
                return Err(RpcError::invalid_params());
            }
            if let Some(unexpected) = params.keys().find(|key| !required.contains(key)) {
                debug!(method = descriptor.name(), key = %unexpected, "parameter is not allowed");
                return Err(RpcError::invalid_params());
            }
            Ok(descriptor)
        }
        Some(_) if required.len() > 1 => {
            debug!(
                method = descriptor.name(),
                "params must be an object for methods with several required parameters"
            );
            Err(RpcError::invalid_params())
        }
        Some(_) => Ok(descriptor),
    }
}
