//! ETL configuration
//!
//! Built once at process start from the environment (and an optional `.env`
//! file) and passed by reference into every component.
//!
//! # Environment Variables
//!
//! Required:
//! - `OUTPUT_FILES_PATH`: directory for downloaded archives
//! - `EXTRACTED_FILES_PATH`: directory for extracted delimited files
//!
//! Database (defaults in parentheses):
//! - `DB_HOST` (localhost), `DB_PORT` (5432), `DB_USER` (postgres),
//!   `DB_PASSWORD` (empty), `DB_NAME` (receita_federal)
//! - `DB_MIN_CONNECTIONS` (5), `DB_MAX_CONNECTIONS` (20)
//! - `DB_COMMAND_TIMEOUT_SECS` (60), `INDEX_STATEMENT_TIMEOUT_SECS` (3600)
//!
//! Tuning:
//! - `CNPJ_BASE_URL`, `HTTP_USER_AGENT`, `HTTP_TIMEOUT_SECS`
//! - `DOWNLOAD_CONCURRENCY` (3), `EXTRACT_WORKERS` (4)
//! - `LOAD_BATCH_SIZE` (8192), `LOAD_MAX_IN_FLIGHT` (10)
//! - `ESTABLISHMENT_WINDOW_ROWS` (2000000), `SIMPLES_WINDOW_ROWS` (1000000)

use cnpj_common::CnpjError;
use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::source::retry::RetryPolicy;

/// Monthly listing page of the Receita Federal open-data release
pub const DEFAULT_BASE_URL: &str =
    "https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj/2025-06/";

/// Some mirrors reject default client user agents
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 3;
pub const DEFAULT_EXTRACT_WORKERS: usize = 4;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_NAME: &str = "receita_federal";
pub const DEFAULT_DB_MIN_CONNECTIONS: u32 = 5;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
pub const DEFAULT_DB_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Index builds on the establishment table run for tens of minutes
pub const DEFAULT_INDEX_STATEMENT_TIMEOUT_SECS: u64 = 3600;

pub const DEFAULT_LOAD_BATCH_SIZE: usize = 8192;
pub const DEFAULT_LOAD_MAX_IN_FLIGHT: usize = 10;
pub const DEFAULT_ESTABLISHMENT_WINDOW_ROWS: usize = 2_000_000;
pub const DEFAULT_SIMPLES_WINDOW_ROWS: usize = 1_000_000;

type ConfigResult<T> = std::result::Result<T, CnpjError>;

/// Complete configuration for one ETL run
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub paths: PathsConfig,
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub load: LoadConfig,
}

/// Local working directories
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Downloaded `.zip` archives
    pub output_dir: PathBuf,
    /// Extracted delimited files
    pub extracted_dir: PathBuf,
}

/// Remote source settings
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub download_concurrency: usize,
    pub retry: RetryPolicy,
}

/// Destination database settings
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub command_timeout_secs: u64,
    pub index_timeout_secs: u64,
}

/// Reader, extractor and loader tuning
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub extract_workers: usize,
    pub establishment_window_rows: usize,
    pub simples_window_rows: usize,
}

impl EtlConfig {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> ConfigResult<Self> {
        load_dotenv();

        let config = Self {
            paths: PathsConfig {
                output_dir: PathBuf::from(required("OUTPUT_FILES_PATH")?),
                extracted_dir: PathBuf::from(required("EXTRACTED_FILES_PATH")?),
            },
            source: SourceConfig {
                base_url: setting("CNPJ_BASE_URL", DEFAULT_BASE_URL.to_string())?,
                user_agent: setting("HTTP_USER_AGENT", DEFAULT_USER_AGENT.to_string())?,
                timeout_secs: setting("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
                download_concurrency: setting(
                    "DOWNLOAD_CONCURRENCY",
                    DEFAULT_DOWNLOAD_CONCURRENCY,
                )?,
                retry: RetryPolicy::default(),
            },
            database: DatabaseConfig {
                host: setting("DB_HOST", DEFAULT_DB_HOST.to_string())?,
                port: setting("DB_PORT", DEFAULT_DB_PORT)?,
                user: setting("DB_USER", DEFAULT_DB_USER.to_string())?,
                password: setting("DB_PASSWORD", String::new())?,
                name: setting("DB_NAME", DEFAULT_DB_NAME.to_string())?,
                min_connections: setting("DB_MIN_CONNECTIONS", DEFAULT_DB_MIN_CONNECTIONS)?,
                max_connections: setting("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
                command_timeout_secs: setting(
                    "DB_COMMAND_TIMEOUT_SECS",
                    DEFAULT_DB_COMMAND_TIMEOUT_SECS,
                )?,
                index_timeout_secs: setting(
                    "INDEX_STATEMENT_TIMEOUT_SECS",
                    DEFAULT_INDEX_STATEMENT_TIMEOUT_SECS,
                )?,
            },
            load: LoadConfig {
                batch_size: setting("LOAD_BATCH_SIZE", DEFAULT_LOAD_BATCH_SIZE)?,
                max_in_flight: setting("LOAD_MAX_IN_FLIGHT", DEFAULT_LOAD_MAX_IN_FLIGHT)?,
                extract_workers: setting("EXTRACT_WORKERS", DEFAULT_EXTRACT_WORKERS)?,
                establishment_window_rows: setting(
                    "ESTABLISHMENT_WINDOW_ROWS",
                    DEFAULT_ESTABLISHMENT_WINDOW_ROWS,
                )?,
                simples_window_rows: setting("SIMPLES_WINDOW_ROWS", DEFAULT_SIMPLES_WINDOW_ROWS)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or misconfigure a run
    pub fn validate(&self) -> ConfigResult<()> {
        if self.paths.output_dir.as_os_str().is_empty() {
            return Err(CnpjError::Config("OUTPUT_FILES_PATH cannot be empty".into()));
        }
        if self.paths.extracted_dir.as_os_str().is_empty() {
            return Err(CnpjError::Config("EXTRACTED_FILES_PATH cannot be empty".into()));
        }
        if self.source.base_url.is_empty() {
            return Err(CnpjError::Config("CNPJ_BASE_URL cannot be empty".into()));
        }
        if self.source.download_concurrency == 0 {
            return Err(CnpjError::Config("DOWNLOAD_CONCURRENCY must be greater than 0".into()));
        }
        if self.database.max_connections == 0 {
            return Err(CnpjError::Config("DB_MAX_CONNECTIONS must be greater than 0".into()));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(CnpjError::Config(format!(
                "DB_MIN_CONNECTIONS ({}) cannot be greater than DB_MAX_CONNECTIONS ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }
        let load = &self.load;
        for (key, value) in [
            ("LOAD_BATCH_SIZE", load.batch_size),
            ("LOAD_MAX_IN_FLIGHT", load.max_in_flight),
            ("EXTRACT_WORKERS", load.extract_workers),
            ("ESTABLISHMENT_WINDOW_ROWS", load.establishment_window_rows),
            ("SIMPLES_WINDOW_ROWS", load.simples_window_rows),
        ] {
            if value == 0 {
                return Err(CnpjError::Config(format!("{} must be greater than 0", key)));
            }
        }
        if load.max_in_flight as u32 > self.database.max_connections {
            warn!(
                max_in_flight = load.max_in_flight,
                max_connections = self.database.max_connections,
                "Batch concurrency exceeds pool size; inserts will queue on the pool"
            );
        }
        Ok(())
    }

    /// Create the working directories if they do not exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.paths.output_dir)?;
        std::fs::create_dir_all(&self.paths.extracted_dir)?;
        Ok(())
    }

    /// Full URL of an archive on the listing page
    pub fn archive_url(&self, name: &str) -> String {
        if self.source.base_url.ends_with('/') {
            format!("{}{}", self.source.base_url, name)
        } else {
            format!("{}/{}", self.source.base_url, name)
        }
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.paths.output_dir.join(name)
    }
}

impl DatabaseConfig {
    /// Connection options shared by the load and index pools
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
            .options([("client_encoding", "UTF8"), ("timezone", "UTC")])
    }

    /// Load connections abort any single statement after the command timeout
    pub fn load_connect_options(&self) -> PgConnectOptions {
        self.connect_options().options([(
            "statement_timeout",
            (self.command_timeout_secs * 1000).to_string(),
        )])
    }

    /// Index and integrity sessions run catalog scans and builds over the
    /// largest tables, so they get the index timeout instead
    pub fn index_connect_options(&self) -> PgConnectOptions {
        self.connect_options().options([(
            "statement_timeout",
            (self.index_timeout_secs * 1000).to_string(),
        )])
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("index_timeout_secs", &self.index_timeout_secs)
            .finish()
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
            max_in_flight: DEFAULT_LOAD_MAX_IN_FLIGHT,
            extract_workers: DEFAULT_EXTRACT_WORKERS,
            establishment_window_rows: DEFAULT_ESTABLISHMENT_WINDOW_ROWS,
            simples_window_rows: DEFAULT_SIMPLES_WINDOW_ROWS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            name: DEFAULT_DB_NAME.to_string(),
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            command_timeout_secs: DEFAULT_DB_COMMAND_TIMEOUT_SECS,
            index_timeout_secs: DEFAULT_INDEX_STATEMENT_TIMEOUT_SECS,
        }
    }
}

impl SourceConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }

    /// HTTP client with the configured user agent and timeout
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
    }
}

impl EtlConfig {
    /// Configuration rooted at `work_dir`, with defaults everywhere else
    pub fn for_work_dir(work_dir: &Path, base_url: impl Into<String>) -> Self {
        Self {
            paths: PathsConfig {
                output_dir: work_dir.join("output"),
                extracted_dir: work_dir.join("extracted"),
            },
            source: SourceConfig::with_base_url(base_url),
            database: DatabaseConfig::default(),
            load: LoadConfig::default(),
        }
    }
}

/// Look for `.env` in the working directory first, then its parent
fn load_dotenv() {
    let mut candidates = vec![PathBuf::from(".env")];
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(parent) = cwd.parent() {
            candidates.push(parent.join(".env"));
        }
    }
    load_first_env_file(&candidates);
}

/// Load the first candidate that exists; an unreadable or malformed file is
/// reported and stops the search
fn load_first_env_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    for path in candidates {
        match dotenvy::from_path(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Loaded environment file");
                return Some(path.clone());
            },
            Err(e) if e.not_found() => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unusable environment file");
                return None;
            },
        }
    }
    None
}

fn required(key: &str) -> ConfigResult<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(CnpjError::Config(format!("{} must be set", key))),
    }
}

fn setting<T: FromStr>(key: &str, default: T) -> ConfigResult<T> {
    parse_setting(key, std::env::var(key).ok(), default)
}

fn parse_setting<T: FromStr>(key: &str, raw: Option<String>, default: T) -> ConfigResult<T> {
    match raw {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| CnpjError::invalid_setting(key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EtlConfig {
        EtlConfig::for_work_dir(Path::new("/tmp/cnpj"), "http://localhost/dados/")
    }

    #[test]
    fn test_env_file_search_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.env");
        let unusable = dir.path().join("dir.env");
        let valid = dir.path().join("valid.env");
        std::fs::create_dir(&unusable).unwrap();
        std::fs::write(&valid, "CNPJ_ENV_FILE_MARKER=loaded\n").unwrap();

        assert_eq!(load_first_env_file(&[missing.clone()]), None);
        assert_eq!(load_first_env_file(&[unusable.clone(), valid.clone()]), None);
        assert!(std::env::var("CNPJ_ENV_FILE_MARKER").is_err());

        assert_eq!(load_first_env_file(&[missing, valid.clone()]), Some(valid));
        assert_eq!(std::env::var("CNPJ_ENV_FILE_MARKER").unwrap(), "loaded");
    }

    #[test]
    fn test_parse_setting_defaults_and_errors() {
        assert_eq!(parse_setting("DB_PORT", None, 5432u16).unwrap(), 5432);
        assert_eq!(parse_setting("DB_PORT", Some(" ".into()), 5432u16).unwrap(), 5432);
        assert_eq!(parse_setting("DB_PORT", Some("6543".into()), 5432u16).unwrap(), 6543);
        assert!(parse_setting("DB_PORT", Some("abc".into()), 5432u16).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_pool_bounds_validated() {
        let mut config = config();
        config.database.min_connections = 30;
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tuning_values_rejected() {
        let mut config = config();
        config.load.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.source.download_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_archive_url_joins_with_single_slash() {
        let mut config = config();
        assert_eq!(config.archive_url("Cnaes.zip"), "http://localhost/dados/Cnaes.zip");
        config.source.base_url = "http://localhost/dados".into();
        assert_eq!(config.archive_url("Cnaes.zip"), "http://localhost/dados/Cnaes.zip");
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut db = DatabaseConfig::default();
        db.password = "hunter2".into();
        let rendered = format!("{:?}", db);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
