//! Session context and the methods served by the binary

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Number, Value};
use tracing::{debug, info};

use crate::errors::AppError;
use crate::rpc::{
    handler_fn, Arguments, ContextFactory, ExecutionContext, MethodDescriptor, RpcError,
};

/// Per-request session handed to every method.
#[derive(Debug)]
pub struct Session {
    id: u64,
    opened_at: Instant,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ExecutionContext for Session {
    fn release(&mut self) {
        debug!(
            session = self.id,
            open_us = self.opened_at.elapsed().as_micros(),
            "session released"
        );
    }
}

#[derive(Debug, Default)]
pub struct SessionFactory {
    next_id: AtomicU64,
}

impl SessionFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextFactory for SessionFactory {
    type Context = Session;

    fn acquire(&self) -> Result<Session, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Session {
            id,
            opened_at: Instant::now(),
        })
    }
}

pub fn demo_methods() -> Vec<MethodDescriptor<Session>> {
    vec![
        MethodDescriptor::standard("echo", handler_fn(echo)).required(["value"]),
        MethodDescriptor::standard("add", handler_fn(add)).required(["a", "b"]),
        MethodDescriptor::standard("greet", handler_fn(greet))
            .required(["name"])
            .optional("greeting", json!("Hello")),
        MethodDescriptor::standard("time", handler_fn(time)),
        MethodDescriptor::standard("session", handler_fn(session)),
        MethodDescriptor::notification("log", handler_fn(log)).required(["message"]),
    ]
}

fn echo(_session: &Session, args: Arguments) -> Result<Value, AppError> {
    args.get("value")
}

fn add(_session: &Session, args: Arguments) -> Result<Value, AppError> {
    let a: Number = args.get("a")?;
    let b: Number = args.get("b")?;

    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a
            .checked_add(b)
            .map(Value::from)
            .ok_or_else(|| RpcError::with_message(-32000, "integer overflow").into());
    }

    let sum = a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default();
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| RpcError::with_message(-32000, "result is not a finite number").into())
}

fn greet(_session: &Session, args: Arguments) -> Result<Value, AppError> {
    let name: String = args.get("name")?;
    let greeting: String = args.get("greeting")?;
    Ok(json!(format!("{greeting}, {name}!")))
}

fn time(_session: &Session, _args: Arguments) -> Result<Value, AppError> {
    Ok(json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)))
}

fn session(session: &Session, _args: Arguments) -> Result<Value, AppError> {
    Ok(json!({ "session": session.id() }))
}

fn log(session: &Session, args: Arguments) -> Result<Value, AppError> {
    let message: String = args.get("message")?;
    info!(session = session.id(), message = %message, "client log");
    Ok(Value::Null)
}
