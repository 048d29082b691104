//! server-manager
//!
//! Tracks container templates, hosting nodes, users and the game servers
//! placed on those nodes, and exposes them over a REST API.

use anyhow::Result;
use server_manager::{
    api, auth,
    config::{self, Config},
    db::Database,
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Credentials of the bootstrap admin created in dev mode.
const DEV_ADMIN_USERNAME: &str = "admin";
const DEV_ADMIN_PASSWORD: &str = "admin";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    info!("Starting server-manager");
    info!(
        listen_addr = %config.listen_addr,
        environment = config.environment.as_str(),
        port_range = %config.port_range,
        data_path = %config.data_path.display(),
        "Configuration loaded"
    );

    config::ensure_data_dir(&config.data_path)?;

    let db = match Database::connect(&config.database, config.port_range).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if config.dev_mode() {
        bootstrap_dev(&db, &config).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState::new(db, config.clone());
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            log_server_exit(result);
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(std::time::Duration::from_secs(10), server_handle).await {
        Ok(result) => log_server_exit(result),
        Err(_) => warn!("HTTP server did not shut down in time"),
    }

    info!("server-manager shutdown complete");
    Ok(())
}

/// Prefer RUST_LOG, fall back to SM_LOG_LEVEL. JSON lines outside dev.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.dev_mode() {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Migrations, the bootstrap admin and optionally the sample fleet.
async fn bootstrap_dev(db: &Database, config: &Config) -> Result<()> {
    info!("Running database migrations (dev mode)");
    if let Err(e) = db.run_migrations().await {
        error!(error = %e, "Failed to run migrations");
        return Err(e.into());
    }

    let hash = auth::hash_password(DEV_ADMIN_PASSWORD)?;
    if db.users().ensure_admin(DEV_ADMIN_USERNAME, &hash).await? {
        warn!(
            username = DEV_ADMIN_USERNAME,
            "Created bootstrap admin with the default password"
        );
    }

    if config.dev_seed {
        info!("Loading development seed data");
        db.seed_dev_data().await?;
    }
    Ok(())
}

fn log_server_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("Server exited normally"),
        Ok(Err(e)) => error!(error = %e, "Server error"),
        Err(e) => error!(error = %e, "Server task panicked"),
    }
}
