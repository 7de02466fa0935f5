//! Index builder
//!
//! Runs after every table is loaded. Each index is checked against
//! `pg_indexes` first, so re-running the builder only creates what is
//! still missing. A failed build (usually a timeout on the establishment
//! table) is recorded and the next index is attempted.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::db::catalog;
use crate::error::Result;

/// A named lookup index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

impl IndexSpec {
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.name,
            self.table,
            self.columns.join(", ")
        )
    }
}

/// Every index of the destination schema, in build order
pub const INDEXES: [IndexSpec; 7] = [
    IndexSpec {
        name: "empresa_cnpj",
        table: "empresa",
        columns: &["cnpj_basico"],
    },
    IndexSpec {
        name: "estabelecimento_cnpj",
        table: "estabelecimento",
        columns: &["cnpj_basico"],
    },
    IndexSpec {
        name: "estabelecimento_cnpj_completo",
        table: "estabelecimento",
        columns: &["cnpj_basico", "cnpj_ordem", "cnpj_dv"],
    },
    IndexSpec {
        name: "socios_cnpj",
        table: "socios",
        columns: &["cnpj_basico"],
    },
    IndexSpec {
        name: "simples_cnpj",
        table: "simples",
        columns: &["cnpj_basico"],
    },
    IndexSpec {
        name: "estabelecimento_situacao",
        table: "estabelecimento",
        columns: &["situacao_cadastral"],
    },
    IndexSpec {
        name: "estabelecimento_municipio",
        table: "estabelecimento",
        columns: &["municipio"],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Created { elapsed: Duration },
    Existing,
    /// The indexed table is missing
    Skipped,
    Failed { error: String },
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Created { elapsed } => write!(f, "created in {:.1}s", elapsed.as_secs_f64()),
            IndexStatus::Existing => f.write_str("already exists"),
            IndexStatus::Skipped => f.write_str("skipped, table missing"),
            IndexStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Outcome of one index build pass
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub entries: Vec<(&'static str, IndexStatus)>,
}

impl IndexReport {
    fn names(&self, pred: impl Fn(&IndexStatus) -> bool) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|(_, status)| pred(status))
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn created(&self) -> Vec<&'static str> {
        self.names(|s| matches!(s, IndexStatus::Created { .. }))
    }

    pub fn existing(&self) -> Vec<&'static str> {
        self.names(|s| matches!(s, IndexStatus::Existing))
    }

    pub fn skipped(&self) -> Vec<&'static str> {
        self.names(|s| matches!(s, IndexStatus::Skipped))
    }

    pub fn failed(&self) -> Vec<&'static str> {
        self.names(|s| matches!(s, IndexStatus::Failed { .. }))
    }

    /// Every index is now present
    pub fn is_complete(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, s)| matches!(s, IndexStatus::Created { .. } | IndexStatus::Existing))
    }
}

/// Creates the missing indexes on one long-timeout session
pub struct IndexBuilder {
    pool: PgPool,
    timeout: Duration,
}

impl IndexBuilder {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Build every index in [`INDEXES`]
    pub async fn build_all(&self) -> Result<IndexReport> {
        self.build(&INDEXES).await
    }

    /// Build the given indexes, skipping those already present
    ///
    /// Only failing to obtain or configure the session is an error; per-index
    /// failures land in the report.
    pub async fn build(&self, specs: &[IndexSpec]) -> Result<IndexReport> {
        let mut conn = self.pool.acquire().await?;
        self.configure_session(&mut conn).await?;

        let started = Instant::now();
        let mut report = IndexReport::default();
        info!(indexes = specs.len(), "Building indexes");

        for spec in specs {
            let status = match self.build_one(&mut conn, spec).await {
                Ok(status) => status,
                Err(e) => {
                    error!(index = spec.name, table = spec.table, error = %e, "Index build failed");
                    IndexStatus::Failed {
                        error: e.to_string(),
                    }
                },
            };
            report.entries.push((spec.name, status));
        }

        // Timeouts are per-session; hand the connection back with defaults
        let reset = sqlx::query("RESET ALL").execute(&mut *conn).await;
        if let Err(e) = reset {
            warn!(error = %e, "Could not reset index session settings");
            let _ = conn.detach();
        }

        info!(
            created = report.created().len(),
            existing = report.existing().len(),
            skipped = report.skipped().len(),
            failed = report.failed().len(),
            elapsed_secs = started.elapsed().as_secs(),
            "Index build pass finished"
        );
        Ok(report)
    }

    async fn configure_session(&self, conn: &mut PoolConnection<Postgres>) -> Result<()> {
        let millis = self.timeout.as_millis();
        for setting in ["statement_timeout", "lock_timeout", "idle_in_transaction_session_timeout"] {
            sqlx::query(&format!("SET {} = {}", setting, millis))
                .execute(&mut **conn)
                .await?;
        }
        Ok(())
    }

    async fn build_one(&self, conn: &mut PoolConnection<Postgres>, spec: &IndexSpec) -> Result<IndexStatus> {
        if catalog::index_exists(&mut **conn, spec.name).await? {
            info!(index = spec.name, "Index already exists, skipping");
            return Ok(IndexStatus::Existing);
        }
        if !catalog::table_exists(&mut **conn, spec.table).await? {
            warn!(index = spec.name, table = spec.table, "Table does not exist, skipping index");
            return Ok(IndexStatus::Skipped);
        }

        let rows = catalog::row_count(&mut **conn, spec.table).await?;
        info!(index = spec.name, table = spec.table, rows, "Creating index");

        let started = Instant::now();
        sqlx::query(&spec.create_sql()).execute(&mut **conn).await?;
        let elapsed = started.elapsed();

        info!(index = spec.name, elapsed_secs = elapsed.as_secs_f64(), "Index created");
        Ok(IndexStatus::Created { elapsed })
    }
}
