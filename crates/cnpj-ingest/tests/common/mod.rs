//! Shared helpers for the cnpj-ingest integration tests
//!
//! Database tests start a throwaway PostgreSQL container and are marked
//! `#[ignore = "requires Docker"]`. Run them with:
//!
//! ```text
//! cargo test -p cnpj-ingest -- --ignored
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use cnpj_ingest::config::DatabaseConfig;
use sqlx::PgPool;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;
use zip::write::SimpleFileOptions;

/// PostgreSQL container plus a pool built the same way the binary builds it
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    config: DatabaseConfig,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let config = DatabaseConfig {
            host: host.to_string(),
            port,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "postgres".to_string(),
            min_connections: 1,
            max_connections: 5,
            ..DatabaseConfig::default()
        };

        let pool = cnpj_ingest::db::create_pool(&config)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            config,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    /// Index names present on the given table
    pub async fn indexes_on(&self, table: &str) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT indexname::text FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = $1 ORDER BY indexname",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }

    /// Column names of a table in ordinal order
    pub async fn columns_of(&self, table: &str) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }
}

/// Write a zip archive with the given entries
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

/// Quote and join fields the way the publisher does, ending with a newline
pub fn source_line(fields: &[&str]) -> String {
    let quoted: Vec<String> = fields.iter().map(|f| format!("\"{}\"", f)).collect();
    format!("{}\n", quoted.join(";"))
}

/// Encode text as ISO-8859-1 bytes; every char must be below U+0100
pub fn latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| u8::try_from(u32::from(c)).unwrap()).collect()
}

/// A 30-field establishment record
pub fn establishment_fields<'a>(
    basico: &'a str,
    ordem: &'a str,
    dv: &'a str,
    situacao: &'a str,
    data_situacao: &'a str,
    municipio: &'a str,
) -> Vec<&'a str> {
    vec![
        basico, ordem, dv, "1", "LOJA CENTRO", situacao, data_situacao, "00", "", "",
        "20100315", "4711302", "4712100,4721102", "RUA", "DAS FLORES", "100", "SALA 2",
        "CENTRO", "01001000", "SP", municipio, "11", "33334444", "", "", "", "",
        "contato@example.com.br", "", "",
    ]
}
