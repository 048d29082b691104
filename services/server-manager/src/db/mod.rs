//! Database layer for server-manager.
//!
//! This module provides:
//! - Connection pool management and runtime migrations
//! - One store per table: templates, nodes, users, servers (with links)
//! - Capacity and port allocation helpers used by server writes
//! - The development seed
//!
//! The database layer uses SQLx with Postgres.

pub mod capacity;
mod error;
mod nodes;
pub mod ports;
mod seed;
mod servers;
mod templates;
mod users;

pub use capacity::{CapacityExceeded, MinimumViolation, ResourceDimension, Resources};
pub use error::DbError;
pub use nodes::{NewNode, Node, NodeStore, NodeUsage};
pub use ports::PortRange;
pub use seed::seed_dev_data;
pub use servers::{NewServer, Server, ServerStore, ServerUpdate};
pub use templates::{NewTemplate, Template, TemplateStore, TemplateUpdate};
pub use users::{AccountUpdate, UpdatedAccount, User, UserStore, BOOTSTRAP_ADMIN_ID};

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::auth::TokenStore;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/server_manager";

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    port_range: PortRange,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig, port_range: PortRange) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool, port_range })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, port_range: PortRange) -> Self {
        Self { pool, port_range }
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Run pending migrations.
    ///
    /// Migrations are loaded at runtime from the first directory that exists.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/server-manager/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Load the development fixtures.
    pub async fn seed_dev_data(&self) -> Result<(), DbError> {
        seed::seed_dev_data(&self.pool).await
    }

    pub fn templates(&self) -> TemplateStore {
        TemplateStore::new(self.pool.clone())
    }

    pub fn nodes(&self) -> NodeStore {
        NodeStore::new(self.pool.clone())
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    pub fn servers(&self) -> ServerStore {
        ServerStore::new(self.pool.clone(), self.port_range)
    }

    pub fn tokens(&self) -> TokenStore {
        TokenStore::new(self.pool.clone())
    }

    pub fn port_range(&self) -> PortRange {
        self.port_range
    }
}
