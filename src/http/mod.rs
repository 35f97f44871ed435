//! HTTP transport binding for the JSON-RPC engine
//!
//! Write methods on the configured path feed the request body to the engine;
//! everything else on that path is refused here, before the engine sees it.

pub mod handlers;
