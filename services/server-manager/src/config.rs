//! Runtime configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

use crate::db::{DbConfig, PortRange, DEFAULT_DATABASE_URL};

/// Deployment environment (`SM_ENV`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "DEV",
            Self::Test => "TEST",
            Self::Prod => "PROD",
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEV" => Ok(Self::Dev),
            "TEST" => Ok(Self::Test),
            "PROD" => Ok(Self::Prod),
            _ => Err(ConfigError::Invalid {
                key: "SM_ENV",
                value: s.to_string(),
                reason: "expected DEV, TEST or PROD".to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid port range {start}-{end}: start must not exceed end")]
    PortRange { start: u16, end: u16 },

    #[error("data path {path} is not writable: {source}")]
    DataPathNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub environment: Environment,
    pub log_level: String,
    pub database: DbConfig,
    pub port_range: PortRange,
    pub data_path: PathBuf,
    pub token_lifetime: Duration,
    pub cors_origins: Vec<String>,
    pub dev_seed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            environment: Environment::Prod,
            log_level: "info".to_string(),
            database: DbConfig::default(),
            port_range: PortRange::default(),
            data_path: PathBuf::from("/data"),
            token_lifetime: Duration::minutes(30),
            cors_origins: Vec::new(),
            dev_seed: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_addr = parse_or(&lookup, "SM_LISTEN_ADDR", defaults.listen_addr)?;

        let environment = match lookup("SM_ENV") {
            Some(value) => value.parse()?,
            None => defaults.environment,
        };

        let log_level = lookup("SM_LOG_LEVEL").unwrap_or(defaults.log_level);

        let database_url = lookup("SM_DB_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let database = DbConfig {
            database_url,
            max_connections: parse_or(
                &lookup,
                "DB_MAX_CONNECTIONS",
                defaults.database.max_connections,
            )?,
            min_connections: parse_or(
                &lookup,
                "DB_MIN_CONNECTIONS",
                defaults.database.min_connections,
            )?,
            ..defaults.database
        };

        let start = parse_or(&lookup, "SM_PORT_START", defaults.port_range.start)?;
        let end = parse_or(&lookup, "SM_PORT_END", defaults.port_range.end)?;
        let port_range = PortRange::new(start, end).ok_or(ConfigError::PortRange { start, end })?;

        let data_path = lookup("SM_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_path);

        let ttl_minutes: i64 = parse_or(&lookup, "SM_TOKEN_TTL_MINUTES", 30)?;
        if ttl_minutes <= 0 {
            return Err(ConfigError::Invalid {
                key: "SM_TOKEN_TTL_MINUTES",
                value: ttl_minutes.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let cors_origins = lookup("SM_CORS_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let dev_seed = lookup("SM_DEV_SEED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            listen_addr,
            environment,
            log_level,
            database,
            port_range,
            data_path,
            token_lifetime: Duration::minutes(ttl_minutes),
            cors_origins,
            dev_seed,
        })
    }

    pub fn dev_mode(&self) -> bool {
        self.environment.is_dev()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

/// Make sure the data directory exists and accepts writes.
pub fn ensure_data_dir(path: &Path) -> Result<(), ConfigError> {
    let not_writable = |source| ConfigError::DataPathNotWritable {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(path).map_err(not_writable)?;
    let check_file = path.join(".server-manager-write-check");
    std::fs::write(&check_file, b"ok").map_err(not_writable)?;
    std::fs::remove_file(&check_file).map_err(not_writable)?;
    Ok(())
}
