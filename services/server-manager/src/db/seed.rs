//! Development fixture data.

use sqlx::postgres::PgPool;
use tracing::info;

use super::DbError;

const DEV_SEED: &str = include_str!("../../seeds/dev.sql");

/// Replace the fleet tables with the development fixtures.
///
/// The whole script runs in one transaction. User 1 (the bootstrap admin)
/// survives; every other account is removed before the fixtures are loaded.
pub async fn seed_dev_data(pool: &PgPool) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    sqlx::raw_sql(DEV_SEED).execute(&mut *tx).await?;
    tx.commit().await?;

    info!("Development seed data loaded");
    Ok(())
}
