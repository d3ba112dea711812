use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub wallet_rpc_url: String,
    pub http_bind_addr: String,
    pub confirmations: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("CONFIRMATIONS must be a positive integer, got {0:?}")]
    InvalidConfirmations(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let wallet_rpc_url =
            env::var("WALLET_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:1248".to_string());
        let http_bind_addr = env::var("HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let confirmations = match env::var("CONFIRMATIONS") {
            Ok(raw) => parse_confirmations(&raw)?,
            Err(_) => 1,
        };

        Ok(Self {
            wallet_rpc_url,
            http_bind_addr,
            confirmations,
        })
    }
}

fn parse_confirmations(raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidConfirmations(raw.to_string()))
}
