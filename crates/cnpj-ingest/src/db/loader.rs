//! Batched loader
//!
//! Rows are transposed into one array per column and inserted with a single
//! `INSERT ... SELECT * FROM UNNEST(...)` per batch. Batches run
//! concurrently on the pool, capped at `max_in_flight`. Every batch is
//! polled from the calling task, so progress is only touched there.

use chrono::NaiveDate;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use tracing::{debug, info};

use cnpj_common::format::{format_count, percent, Milestones};

use crate::config::LoadConfig;
use crate::error::{EtlError, Result};
use crate::schema::{ColumnKind, TableSchema};
use crate::transform::{Row, Value};

/// Loads report at `info` every quarter of their rows
const LOG_STEP_PERCENT: f64 = 25.0;

/// One column of a batch, ready to bind as a Postgres array
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Text(Vec<Option<String>>),
    Int(Vec<Option<i32>>),
    Decimal(Vec<Option<BigDecimal>>),
    Date(Vec<Option<NaiveDate>>),
}

impl ColumnData {
    fn with_capacity(kind: ColumnKind, capacity: usize) -> Self {
        match kind {
            ColumnKind::Text => ColumnData::Text(Vec::with_capacity(capacity)),
            ColumnKind::Int => ColumnData::Int(Vec::with_capacity(capacity)),
            ColumnKind::Decimal => ColumnData::Decimal(Vec::with_capacity(capacity)),
            ColumnKind::Date => ColumnData::Date(Vec::with_capacity(capacity)),
        }
    }

    /// Append a cell, returning it back if its kind does not match
    fn push(&mut self, value: Value) -> std::result::Result<(), Value> {
        match (self, value) {
            (ColumnData::Text(col), Value::Text(v)) => col.push(v),
            (ColumnData::Int(col), Value::Int(v)) => col.push(v),
            (ColumnData::Decimal(col), Value::Decimal(v)) => col.push(v),
            (ColumnData::Date(col), Value::Date(v)) => col.push(v),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(c) => c.len(),
            ColumnData::Int(c) => c.len(),
            ColumnData::Decimal(c) => c.len(),
            ColumnData::Date(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A batch of rows in columnar form
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBatch {
    pub columns: Vec<ColumnData>,
    pub rows: usize,
}

impl ColumnBatch {
    /// Transpose rows into columns following `schema`
    pub fn from_rows(schema: &TableSchema, rows: impl IntoIterator<Item = Row>, capacity: usize) -> Result<Self> {
        let mut columns: Vec<ColumnData> = schema
            .columns
            .iter()
            .map(|c| ColumnData::with_capacity(c.kind, capacity))
            .collect();
        let mut count = 0;

        for row in rows {
            if row.len() != columns.len() {
                return Err(EtlError::schema(
                    schema.table(),
                    format!("row {} has {} cells, expected {}", count, row.len(), columns.len()),
                ));
            }
            for ((column, spec), value) in columns.iter_mut().zip(schema.columns).zip(row) {
                column.push(value).map_err(|v| {
                    EtlError::schema(
                        schema.table(),
                        format!("column {} is {:?} but got {:?}", spec.name, spec.kind, v),
                    )
                })?;
            }
            count += 1;
        }

        Ok(Self {
            columns,
            rows: count,
        })
    }
}

/// Concurrent bulk inserter for transformed rows
#[derive(Clone)]
pub struct BatchLoader {
    pool: PgPool,
    batch_size: usize,
    max_in_flight: usize,
}

impl BatchLoader {
    pub fn new(pool: PgPool, batch_size: usize, max_in_flight: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn from_config(pool: PgPool, config: &LoadConfig) -> Self {
        Self::new(pool, config.batch_size, config.max_in_flight)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert every row into `schema`'s table, returning rows inserted
    ///
    /// The first failing batch aborts the load and its error is returned;
    /// batches still in flight are dropped.
    pub async fn load(&self, schema: &TableSchema, rows: Vec<Row>, progress: Option<&ProgressBar>) -> Result<u64> {
        let total = rows.len() as u64;
        if total == 0 {
            return Ok(0);
        }

        let sql = schema.insert_sql();
        let mut pending = rows.into_iter().peekable();
        let mut in_flight = FuturesUnordered::new();
        let mut inserted: u64 = 0;
        let mut milestones = Milestones::new(LOG_STEP_PERCENT);

        while pending.peek().is_some() {
            if in_flight.len() >= self.max_in_flight {
                if let Some(result) = in_flight.next().await {
                    let rows = result?;
                    inserted += rows;
                    self.record_progress(schema, rows, inserted, total, progress, &mut milestones);
                }
            }

            let batch = ColumnBatch::from_rows(schema, pending.by_ref().take(self.batch_size), self.batch_size)?;
            in_flight.push(self.insert_batch(&sql, batch));
        }

        while let Some(result) = in_flight.next().await {
            let rows = result?;
            inserted += rows;
            self.record_progress(schema, rows, inserted, total, progress, &mut milestones);
        }

        Ok(inserted)
    }

    fn record_progress(
        &self,
        schema: &TableSchema,
        rows: u64,
        done: u64,
        total: u64,
        progress: Option<&ProgressBar>,
        milestones: &mut Milestones,
    ) {
        if let Some(pb) = progress {
            pb.inc(rows);
        }
        match milestones.reached(done, total) {
            Some(pct) => info!(
                table = schema.table(),
                "{:.0}% loaded ({}/{})",
                pct,
                format_count(done),
                format_count(total)
            ),
            None => debug!(table = schema.table(), "{:.1}% {}/{}", percent(done, total), done, total),
        }
    }

    async fn insert_batch(&self, sql: &str, batch: ColumnBatch) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for column in batch.columns {
            query = match column {
                ColumnData::Text(values) => query.bind(values),
                ColumnData::Int(values) => query.bind(values),
                ColumnData::Decimal(values) => query.bind(values),
                ColumnData::Date(values) => query.bind(values),
            };
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
