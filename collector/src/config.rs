//! Environment-derived configuration for the collector process.

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub host: String,
    pub port: u16,
}

fn env_str(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    let port_str = env_str("PORT", "9000");
    let port: u16 = port_str
        .parse()
        .map_err(|_| ConfigError::InvalidPort(port_str))?;

    Ok(Config {
        db_path: env_str("COLLECTOR_DB_PATH", "collector.db"),
        host: env_str("HOST", "0.0.0.0"),
        port,
    })
}
