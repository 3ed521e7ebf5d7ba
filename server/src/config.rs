//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL URL of the Primary store
    pub primary_database_url: String,
    /// PostgreSQL URL of the Secondary store
    pub secondary_database_url: String,
    /// Pool size for each store
    pub max_connections: u32,
    /// Apply the bundled migrations to both stores at start-up
    pub run_migrations: bool,
    /// Bearer token required on every request when set
    pub auth_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let primary_database_url =
            lookup("PRIMARY_DATABASE_URL").ok_or(ConfigError::MissingPrimaryUrl)?;
        let secondary_database_url =
            lookup("SECONDARY_DATABASE_URL").ok_or(ConfigError::MissingSecondaryUrl)?;

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => match raw.parse() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxConnections),
            },
            None => 5,
        };

        let run_migrations = match lookup("RUN_MIGRATIONS").as_deref() {
            None => true,
            Some("1" | "true" | "yes") => true,
            Some("0" | "false" | "no") => false,
            Some(_) => return Err(ConfigError::InvalidRunMigrations),
        };

        let auth_secret = lookup("AUTH_SECRET").filter(|s| !s.is_empty());

        Ok(Self {
            host,
            port,
            primary_database_url,
            secondary_database_url,
            max_connections,
            run_migrations,
            auth_secret,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("PRIMARY_DATABASE_URL environment variable is required")]
    MissingPrimaryUrl,

    #[error("SECONDARY_DATABASE_URL environment variable is required")]
    MissingSecondaryUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("DB_MAX_CONNECTIONS must be a positive integer")]
    InvalidMaxConnections,

    #[error("RUN_MIGRATIONS must be true or false")]
    InvalidRunMigrations,
}
