//! Configuration management
//!
//! Values come from the environment (a `.env` file is honoured) and fall back
//! to the defaults below. The CLI may override the ingest settings afterwards;
//! call [`IngestConfig::validate`] once all overrides are applied.

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::path::PathBuf;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_SPEC_DIR: &str = "./specs";
pub const DEFAULT_BUFFER_SIZE: usize = 50;
pub const DEFAULT_FILE_SUFFIX: &str = ".txt";
pub const DEFAULT_SPEC_EXTENSION: &str = "csv";

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5433;
pub const DEFAULT_DB_NAME: &str = "dataplay";
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_OPTIONS: &str = "sslmode=disable";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Worker count when none is configured
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// ============================================================================
// Database
// ============================================================================

/// Relational store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; when set it wins over the individual fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Space separated `key=value` extras, e.g. `sslmode=disable`
    pub options: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            database: DEFAULT_DB_NAME.to_string(),
            username: DEFAULT_DB_USER.to_string(),
            password: None,
            options: DEFAULT_DB_OPTIONS.to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            host: env_string("DB_HOST", DEFAULT_DB_HOST),
            port: env_or("DB_PORT", DEFAULT_DB_PORT),
            database: env_string("DB_NAME", DEFAULT_DB_NAME),
            username: env_string("DB_USER", DEFAULT_DB_USER),
            password: std::env::var("DB_PASSWORD").ok(),
            options: env_string("DB_OPTIONS", DEFAULT_DB_OPTIONS),
            max_connections: env_or("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT", DEFAULT_DB_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Assemble sqlx connect options.
    ///
    /// `sslmode` maps onto the TLS setting; every other extra is sent to the
    /// server as a runtime parameter.
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return url.parse();
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username);

        if let Some(password) = &self.password {
            options = options.password(password);
        }

        let mut runtime = Vec::new();
        for (key, value) in self.extra_options()? {
            if key == "sslmode" {
                let mode: PgSslMode = value.parse()?;
                options = options.ssl_mode(mode);
            } else {
                runtime.push((key, value));
            }
        }
        if !runtime.is_empty() {
            options = options.options(runtime);
        }

        Ok(options)
    }

    fn extra_options(&self) -> Result<Vec<(String, String)>, sqlx::Error> {
        self.options
            .split_whitespace()
            .map(|pair| {
                pair.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| {
                        sqlx::Error::Configuration(
                            format!("database option '{}' is not key=value", pair).into(),
                        )
                    })
            })
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be greater than 0");
        }
        if self.url.is_none() && self.host.is_empty() {
            anyhow::bail!("Either DATABASE_URL or DB_HOST must be set");
        }
        Ok(())
    }
}

// ============================================================================
// Ingest
// ============================================================================

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory scanned for data files
    pub data_dir: PathBuf,
    /// Directory holding one spec file per model
    pub spec_dir: PathBuf,
    /// Rows per transactional flush
    pub buffer_size: usize,
    /// Number of concurrent workers
    pub workers: usize,
    /// Only files ending in this suffix are loaded
    pub file_suffix: String,
    /// Extension of spec files, without the dot
    pub spec_extension: String,
    pub database: DatabaseConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            spec_dir: PathBuf::from(DEFAULT_SPEC_DIR),
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: default_workers(),
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            spec_extension: DEFAULT_SPEC_EXTENSION.to_string(),
            database: DatabaseConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            data_dir: PathBuf::from(env_string("FWLOAD_DATA_DIR", DEFAULT_DATA_DIR)),
            spec_dir: PathBuf::from(env_string("FWLOAD_SPEC_DIR", DEFAULT_SPEC_DIR)),
            buffer_size: env_or("FWLOAD_BUFFER_SIZE", DEFAULT_BUFFER_SIZE),
            workers: env_or("FWLOAD_WORKERS", default_workers()),
            file_suffix: env_string("FWLOAD_FILE_SUFFIX", DEFAULT_FILE_SUFFIX),
            spec_extension: env_string("FWLOAD_SPEC_EXTENSION", DEFAULT_SPEC_EXTENSION),
            database: DatabaseConfig::from_env(),
        };

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.buffer_size == 0 {
            anyhow::bail!("FWLOAD_BUFFER_SIZE must be greater than 0");
        }
        if self.workers == 0 {
            anyhow::bail!("FWLOAD_WORKERS must be greater than 0");
        }
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("Data directory cannot be empty");
        }
        if self.spec_dir.as_os_str().is_empty() {
            anyhow::bail!("Spec directory cannot be empty");
        }
        self.database.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "FWLOAD_DATA_DIR",
        "FWLOAD_SPEC_DIR",
        "FWLOAD_BUFFER_SIZE",
        "FWLOAD_WORKERS",
        "FWLOAD_FILE_SUFFIX",
        "FWLOAD_SPEC_EXTENSION",
        "DATABASE_URL",
        "DB_HOST",
        "DB_PORT",
        "DB_NAME",
        "DB_USER",
        "DB_PASSWORD",
        "DB_OPTIONS",
        "DB_MAX_CONNECTIONS",
        "DB_CONNECT_TIMEOUT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_from_env() {
        clear_env();
        let config = IngestConfig::from_env().unwrap();

        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.workers, default_workers());
        assert_eq!(config.file_suffix, ".txt");
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.database.max_connections, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("FWLOAD_BUFFER_SIZE", "7");
        std::env::set_var("FWLOAD_WORKERS", "3");
        std::env::set_var("DB_HOST", "db.internal");
        std::env::set_var("DB_PORT", "not-a-port");

        let config = IngestConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.buffer_size, 7);
        assert_eq!(config.workers, 3);
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, DEFAULT_DB_PORT);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = IngestConfig {
            buffer_size: 0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());

        config.buffer_size = 10;
        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_options_from_fields() {
        let config = DatabaseConfig {
            password: Some("example".to_string()),
            options: "sslmode=disable application_name=fwload".to_string(),
            ..DatabaseConfig::default()
        };
        let options = config.connect_options().unwrap();

        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("dataplay"));
        assert_eq!(options.get_username(), "postgres");
    }

    #[test]
    fn test_connect_options_rejects_malformed_extra() {
        let config = DatabaseConfig {
            options: "sslmode".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(config.connect_options().is_err());

        let config = DatabaseConfig {
            options: "sslmode=sometimes".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(config.connect_options().is_err());
    }

    #[test]
    fn test_url_takes_precedence() {
        let config = DatabaseConfig {
            url: Some("postgres://loader@db.example:6543/warehouse".to_string()),
            ..DatabaseConfig::default()
        };
        let options = config.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.example");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("warehouse"));
    }
}
