// Runtime configuration
// Read once at startup from the process environment (after dotenv has loaded .env)

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string; `None` runs on the in-memory store
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Lifetime of issued access tokens, in seconds
    pub session_ttl_seconds: i64,
    pub catalog_cache_ttl: Duration,
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Build the configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        Ok(Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            jwt_secret,
            session_ttl_seconds: parse_or(&lookup, "SESSION_TTL_SECONDS", 3600)?,
            catalog_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CATALOG_CACHE_TTL_SECONDS",
                60,
            )?),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
        })
    }

    /// Address the HTTP listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            session_ttl_seconds: 3600,
            catalog_cache_ttl: Duration::from_secs(60),
            db_max_connections: 1,
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
