//! CNPJ Ingest Library
//!
//! Bulk ETL for the Receita Federal CNPJ open-data release: downloads the
//! monthly archives, extracts them, parses the Latin-1 `;`-separated files
//! and loads them into ten PostgreSQL tables, then builds lookup indexes.
//!
//! # Pipeline
//!
//! - [`source`]: listing, conditional downloads with retries, extraction
//! - [`classify`]: file name to record type
//! - [`reader`] and [`transform`]: windowed parsing and typed coercion
//! - [`db`]: table provisioning, batched loading and index building
//! - [`pipeline`]: phase orchestration and the run summary
//!
//! # Example
//!
//! ```no_run
//! use cnpj_ingest::{config::EtlConfig, pipeline::Pipeline, progress::Progress};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::from_env()?;
//!     let summary = Pipeline::new(config, Progress::new()).run().await?;
//!     println!("{} rows loaded", summary.rows_loaded());
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod reader;
pub mod schema;
pub mod source;
pub mod transform;

pub use error::{EtlError, Result};
