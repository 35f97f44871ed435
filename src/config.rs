use std::{env, net::SocketAddr};

use thiserror::Error;

pub const DEFAULT_JSONRPC_PATH: &str = "/jsonrpc";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub jsonrpc_path: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("JSONRPC_PATH must start with '/'")]
    InvalidPath,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let jsonrpc_path = env::var("JSONRPC_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| {
                if value.starts_with('/') {
                    Ok(value)
                } else {
                    Err(ConfigError::InvalidPath)
                }
            })
            .transpose()?
            .unwrap_or_else(|| DEFAULT_JSONRPC_PATH.to_string());

        let config = Self {
            bind_addr,
            bind_port,
            jsonrpc_path,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
