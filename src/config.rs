//! Configuration management for the sync server

use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Node id stamped on server-issued HLC timestamps
    pub node_id: String,
    /// Pull page size when the client sends no `limit`
    pub default_page_size: u32,
    /// Upper bound on any pull page
    pub max_page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            node_id: "server".to_string(),
            default_page_size: 100,
            max_page_size: 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8090,
            },
            database: DatabaseConfig {
                url: "sqlite:./sync.db".to_string(),
            },
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            sync: SyncConfig {
                node_id: env::var("SYNC_NODE_ID").unwrap_or(defaults.sync.node_id),
                default_page_size: parse_var(
                    "SYNC_DEFAULT_PAGE_SIZE",
                    defaults.sync.default_page_size,
                ),
                max_page_size: parse_var("SYNC_MAX_PAGE_SIZE", defaults.sync.max_page_size),
            },
        }
    }
}

fn parse_var<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
