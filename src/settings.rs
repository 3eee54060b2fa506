//! Runtime settings from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/relcrud";
pub const DEFAULT_DB_SCHEMA: &str = "public";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub database_url: String,
    /// JSON model definitions; the schema is introspected from the database when unset.
    pub schema_path: Option<PathBuf>,
    pub db_schema: String,
    pub api_config_path: Option<PathBuf>,
    pub bind_addr: SocketAddr,
    pub body_limit_bytes: usize,
}

impl Settings {
    /// Read settings from process env. Call `dotenvy::dotenv()` first to honor a `.env` file.
    pub fn from_env() -> Result<Self, crate::error::ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, crate::error::ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let bind = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
        let bind_addr = bind
            .parse()
            .map_err(|_| crate::error::ConfigError::Load(format!("invalid BIND_ADDR '{}'", bind)))?;
        let body_limit_bytes = match var("BODY_LIMIT_BYTES") {
            Some(v) => v
                .parse()
                .map_err(|_| crate::error::ConfigError::Load(format!("invalid BODY_LIMIT_BYTES '{}'", v)))?,
            None => DEFAULT_BODY_LIMIT_BYTES,
        };
        Ok(Settings {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            schema_path: var("SCHEMA_PATH").map(PathBuf::from),
            db_schema: var("DB_SCHEMA").unwrap_or_else(|| DEFAULT_DB_SCHEMA.into()),
            api_config_path: var("API_CONFIG_PATH").map(PathBuf::from),
            bind_addr,
            body_limit_bytes,
        })
    }
}
