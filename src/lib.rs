use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod methods;
pub mod rpc;

use rpc::RpcService;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn RpcService>,
}

impl AppState {
    pub fn new(engine: Arc<dyn RpcService>) -> Self {
        Self { engine }
    }
}

pub fn build_app(state: AppState, jsonrpc_path: &str) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route(
            jsonrpc_path,
            post(http::handlers::jsonrpc_endpoint)
                .put(http::handlers::jsonrpc_endpoint)
                .fallback(http::handlers::method_not_allowed),
        )
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
