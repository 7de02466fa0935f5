//! Error types for the ETL pipeline

/// Result type for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors raised while fetching, reading or loading the CNPJ corpus
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Delimited file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] cnpj_common::CnpjError),

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Schema mismatch in {table}: {reason}")]
    Schema { table: String, reason: String },

    #[error("Nothing to load: {0}")]
    NothingToLoad(String),

    #[error("Loaded data is incomplete: {0}")]
    IncompleteData(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EtlError {
    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            table: table.into(),
            reason: reason.into(),
        }
    }
}
