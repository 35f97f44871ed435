//! JSON-RPC 2.0 engine
//!
//! Registry, validation, dispatch and batch handling, independent of any
//! transport. The HTTP binding lives in [`crate::http`].

pub mod context;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod response;
pub mod validation;

pub use context::{ContextFactory, ContextGuard, ExecutionContext};
pub use dispatch::{Arguments, JsonRpc, Reply, RpcService};
pub use error::RpcError;
pub use registry::{
    handler_fn, HandlerResult, MethodDescriptor, MethodKind, MethodRegistry, RpcHandler,
};
pub use response::Response;
