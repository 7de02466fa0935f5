//! CNPJ Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the CNPJ open-data ETL workspace.
//!
//! - **Error Handling**: [`CnpjError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Formatting**: human-readable byte and row counts for progress output
//!
//! # Example
//!
//! ```no_run
//! use cnpj_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> cnpj_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     info!("ETL starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod format;
pub mod logging;

pub use error::{CnpjError, Result};
