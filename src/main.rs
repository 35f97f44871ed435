use std::sync::Arc;

use jsonrpc_engine::{
    build_app,
    config::Config,
    logging,
    methods::{demo_methods, SessionFactory},
    rpc::{JsonRpc, MethodRegistry},
    AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;

    let mut registry = MethodRegistry::new();
    registry.register_all(demo_methods());
    info!(methods = ?registry.method_names(), "jsonrpc methods registered");

    let engine = JsonRpc::new(registry, SessionFactory::new());
    let bind_socket = config.bind_socket()?;
    let app = build_app(AppState::new(Arc::new(engine)), &config.jsonrpc_path);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        path = %config.jsonrpc_path,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
