//! Table provisioner
//!
//! A full run always starts from empty tables: each destination table is
//! dropped (with its indexes) and recreated inside one transaction.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::Result;
use crate::schema::TableSchema;

/// Drop and recreate the given tables atomically
pub async fn provision_tables(pool: &PgPool, schemas: &[TableSchema]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for schema in schemas {
        debug!(table = schema.table(), "Recreating table");
        sqlx::query(&schema.drop_table_sql()).execute(&mut *tx).await?;
        sqlx::query(&schema.create_table_sql()).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    info!(tables = schemas.len(), "Destination tables recreated");
    Ok(())
}

/// Drop and recreate all ten destination tables
pub async fn provision_all(pool: &PgPool) -> Result<()> {
    let schemas: Vec<TableSchema> = TableSchema::all().collect();
    provision_tables(pool, &schemas).await
}
