//! Process configuration read from the environment (after `dotenvy::dotenv()`).

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 5001;
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const DEFAULT_PING_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset the server runs against the in-memory identity store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    /// Allowed CORS origin.
    pub frontend_url: String,
    pub ping_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { name: "PORT", value: v })?,
            None => DEFAULT_PORT,
        };
        let ping_timeout_secs = match get("WS_PING_TIMEOUT_SECS") {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidNumber {
                name: "WS_PING_TIMEOUT_SECS",
                value: v,
            })?,
            None => DEFAULT_PING_TIMEOUT_SECS,
        };

        Ok(Self {
            port,
            database_url: get("DATABASE_URL"),
            jwt_secret: get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            frontend_url: get("FRONTEND_URL").unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string()),
            ping_timeout_secs,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}
