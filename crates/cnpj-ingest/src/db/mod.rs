//! Destination database: pool, provisioning, bulk loading and indexes

pub mod catalog;
pub mod indexes;
pub mod loader;
pub mod provision;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::error::Result;

pub use catalog::{verify_data_integrity, IntegrityReport};
pub use indexes::{IndexBuilder, IndexReport, IndexSpec, IndexStatus, INDEXES};
pub use loader::BatchLoader;
pub use provision::{provision_all, provision_tables};

/// Pool shared by provisioning and batch inserts
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    connect(config, config.load_connect_options(), "load").await
}

/// Pool for integrity scans and index builds, whose full-table counts run
/// under the index statement timeout
pub async fn create_index_pool(config: &DatabaseConfig) -> Result<PgPool> {
    connect(config, config.index_connect_options(), "index").await
}

async fn connect(config: &DatabaseConfig, options: PgConnectOptions, purpose: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.command_timeout())
        .connect_with(options)
        .await?;

    tracing::info!(
        host = %config.host,
        database = %config.name,
        purpose,
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
