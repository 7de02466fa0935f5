//! Catalog queries: table and index existence, row counts

use sqlx::PgExecutor;
use tracing::{info, warn};

use crate::error::Result;
use crate::schema::TableSchema;

pub async fn table_exists<'e>(executor: impl PgExecutor<'e>, table: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(table)
    .fetch_one(executor)
    .await?;
    Ok(exists)
}

pub async fn index_exists<'e>(executor: impl PgExecutor<'e>, index: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM pg_indexes \
         WHERE schemaname = current_schema() AND indexname = $1)",
    )
    .bind(index)
    .fetch_one(executor)
    .await?;
    Ok(exists)
}

/// Exact row count; `table` must come from the fixed schema
pub async fn row_count<'e>(executor: impl PgExecutor<'e>, table: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// State of every destination table before indexes are built
#[derive(Debug, Default, Clone)]
pub struct IntegrityReport {
    /// Table name and its row count, `None` when the table is missing
    pub tables: Vec<(&'static str, Option<i64>)>,
}

impl IntegrityReport {
    pub fn missing(&self) -> Vec<&'static str> {
        self.tables
            .iter()
            .filter(|(_, count)| count.is_none())
            .map(|(table, _)| *table)
            .collect()
    }

    pub fn empty(&self) -> Vec<&'static str> {
        self.tables
            .iter()
            .filter(|(_, count)| *count == Some(0))
            .map(|(table, _)| *table)
            .collect()
    }

    /// Every table exists and holds at least one row
    pub fn is_complete(&self) -> bool {
        !self.tables.is_empty() && self.tables.iter().all(|(_, c)| matches!(c, Some(n) if *n > 0))
    }
}

/// Check that all ten tables exist and are non-empty
pub async fn verify_data_integrity(pool: &sqlx::PgPool) -> Result<IntegrityReport> {
    let mut report = IntegrityReport::default();

    for schema in TableSchema::all() {
        let table = schema.table();
        let count = if table_exists(pool, table).await? {
            Some(row_count(pool, table).await?)
        } else {
            None
        };

        match count {
            Some(0) => warn!(table, "Table is empty"),
            Some(rows) => info!(table, rows, "Table present"),
            None => warn!(table, "Table does not exist"),
        }
        report.tables.push((table, count));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_report_states() {
        let report = IntegrityReport {
            tables: vec![("empresa", Some(3)), ("cnae", Some(0)), ("pais", None)],
        };
        assert!(!report.is_complete());
        assert_eq!(report.missing(), vec!["pais"]);
        assert_eq!(report.empty(), vec!["cnae"]);

        let report = IntegrityReport {
            tables: vec![("empresa", Some(3)), ("cnae", Some(1))],
        };
        assert!(report.is_complete());
        assert!(!IntegrityReport::default().is_complete());
    }
}
