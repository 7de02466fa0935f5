//! Run orchestration
//!
//! A full run is strictly phased: list, download, extract, classify, then
//! recreate the tables and load every record group in order, and finally
//! build indexes. Each phase completes before the next one starts. One
//! generic read, transform and load loop serves all ten record types; they
//! differ only in the [`ReadPlan`] used for their files.

use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use cnpj_common::format::format_count;

use crate::classify::{ClassifiedFiles, RecordKind};
use crate::config::{EtlConfig, LoadConfig};
use crate::db::{self, BatchLoader, IndexBuilder, IndexReport};
use crate::error::{EtlError, Result};
use crate::progress::Progress;
use crate::reader::{self, RecordReader};
use crate::schema::{self, EstablishmentLayout, TableSchema};
use crate::source::fetcher::{ArchiveTarget, FetchOutcome};
use crate::source::{ArchiveExtractor, ArchiveFetcher, ExtractionSummary, FetchSummary, ListingResolver};
use crate::transform::{self, Row};

/// How the files of one record type are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    /// Small enough to read in one go
    Whole,
    /// Fixed-size windows until a short window
    Windowed(usize),
    /// Line count first, then fixed-size windows
    PreScanned(usize),
}

impl ReadPlan {
    pub fn for_kind(kind: RecordKind, config: &LoadConfig) -> Self {
        match kind {
            RecordKind::Establishment => ReadPlan::Windowed(config.establishment_window_rows),
            RecordKind::TaxRegime => ReadPlan::PreScanned(config.simples_window_rows),
            _ => ReadPlan::Whole,
        }
    }

    fn window_rows(self) -> usize {
        match self {
            ReadPlan::Whole => usize::MAX,
            ReadPlan::Windowed(rows) | ReadPlan::PreScanned(rows) => rows,
        }
    }
}

/// Outcome of listing, download, extraction and classification
#[derive(Debug, Default, Clone)]
pub struct SourceReport {
    pub listed: usize,
    pub fetch: FetchSummary,
    pub extraction: ExtractionSummary,
    pub classified: ClassifiedFiles,
}

impl SourceReport {
    /// Record types with no file to load
    pub fn missing_kinds(&self) -> Vec<RecordKind> {
        RecordKind::ALL
            .into_iter()
            .filter(|kind| self.classified.files(*kind).is_empty())
            .collect()
    }

    /// Every listed archive was fetched and extracted, and every type has data
    pub fn is_complete(&self) -> bool {
        self.listed > 0
            && self.fetch.failed().is_empty()
            && self.extraction.failed.is_empty()
            && self.missing_kinds().is_empty()
    }
}

/// Rows loaded into one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLoad {
    pub kind: RecordKind,
    pub files: usize,
    pub rows: u64,
    pub elapsed: Duration,
}

/// Final state of a full run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub sources: SourceReport,
    pub loads: Vec<GroupLoad>,
    pub indexes: IndexReport,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn rows_loaded(&self) -> u64 {
        self.loads.iter().map(|g| g.rows).sum()
    }

    pub fn data_complete(&self) -> bool {
        self.sources.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.data_complete() && self.indexes.is_complete()
    }

    /// Announce the outcome; index-only failures point at the resume command
    pub fn log(&self) {
        for group in &self.loads {
            info!(
                table = %group.kind,
                files = group.files,
                rows = %format_count(group.rows),
                elapsed_secs = group.elapsed.as_secs(),
                "Table loaded"
            );
        }

        let rows = format_count(self.rows_loaded());
        let secs = self.elapsed.as_secs();
        match (self.data_complete(), self.indexes.is_complete()) {
            (true, true) => info!(rows = %rows, elapsed_secs = secs, "ETL complete"),
            (true, false) => warn!(
                rows = %rows,
                failed = ?self.indexes.failed(),
                skipped = ?self.indexes.skipped(),
                elapsed_secs = secs,
                "Data complete, indexes incomplete; rerun `cnpj-ingest indexes` to finish"
            ),
            (false, _) => warn!(
                rows = %rows,
                failed_downloads = ?self.sources.fetch.failed(),
                failed_extractions = self.sources.extraction.failed.len(),
                missing_tables = ?self.sources.missing_kinds(),
                elapsed_secs = secs,
                "ETL finished with incomplete data"
            ),
        }
    }
}

/// Drives one ETL run from a fixed configuration
pub struct Pipeline {
    config: EtlConfig,
    progress: Progress,
}

impl Pipeline {
    pub fn new(config: EtlConfig, progress: Progress) -> Self {
        Self { config, progress }
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// List, download, extract and classify the published archives
    ///
    /// Only an unreachable listing page is fatal.
    pub async fn acquire_sources(&self) -> Result<SourceReport> {
        self.config.ensure_dirs()?;
        let client = self.config.source.http_client()?;

        // Step 1: resolve the listing
        let names = ListingResolver::new(client.clone(), self.config.source.base_url.clone())
            .resolve()
            .await?;
        let targets: Vec<ArchiveTarget> = names
            .iter()
            .map(|name| ArchiveTarget {
                name: name.clone(),
                url: self.config.archive_url(name),
                path: self.config.archive_path(name),
            })
            .collect();

        // Step 2: download
        let started = Instant::now();
        let fetcher = ArchiveFetcher::new(
            client,
            self.config.source.retry.clone(),
            self.config.source.download_concurrency,
            self.progress.clone(),
        );
        let fetch = fetcher.fetch_all(&targets).await;
        info!(
            downloaded = fetch.downloaded(),
            current = fetch.current(),
            elapsed_secs = started.elapsed().as_secs(),
            "{}/{} archives available",
            fetch.available(),
            fetch.total()
        );
        for name in fetch.failed() {
            warn!(file = %name, "Archive unavailable, its records will be missing");
        }

        // Step 3: extract whatever is on disk
        let available: Vec<PathBuf> = targets
            .iter()
            .zip(&fetch.outcomes)
            .filter(|(_, (_, outcome))| !matches!(outcome, FetchOutcome::Failed { .. }))
            .map(|(target, _)| target.path.clone())
            .collect();
        let spinner = self.progress.spinner(&format!("Extracting {} archives", available.len()));
        let extraction = ArchiveExtractor::new(
            self.config.paths.extracted_dir.clone(),
            self.config.load.extract_workers,
        )
        .extract_all(&available)
        .await;
        spinner.finish_and_clear();

        // Step 4: classify
        let classified = crate::classify::classify(&extraction.files());
        if classified.is_empty() {
            warn!("No extracted file matches a known record type");
        }

        Ok(SourceReport {
            listed: names.len(),
            fetch,
            extraction,
            classified,
        })
    }

    /// Full run: sources, fresh tables, every record group, then indexes
    ///
    /// Tables are only dropped once there is at least one file to load.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let sources = self.acquire_sources().await?;
        if sources.classified.is_empty() {
            return Err(EtlError::NothingToLoad(format!(
                "{} archives listed, {} available, {} files extracted, none of a known record type; \
                 existing tables left untouched",
                sources.listed,
                sources.fetch.available(),
                sources.extraction.files().len()
            )));
        }

        let pool = db::create_pool(&self.config.database).await?;
        db::health_check(&pool).await?;
        let result = self.load_and_index(&pool, sources, started).await;
        pool.close().await;
        info!("Database pool closed");

        let summary = result?;
        summary.log();
        Ok(summary)
    }

    async fn load_and_index(&self, pool: &PgPool, sources: SourceReport, started: Instant) -> Result<RunSummary> {
        db::provision_all(pool).await?;
        let loads = self.load_all(pool, &sources.classified).await?;
        let indexes = IndexBuilder::new(pool.clone(), self.config.database.index_timeout())
            .build_all()
            .await?;

        Ok(RunSummary {
            sources,
            loads,
            indexes,
            elapsed: started.elapsed(),
        })
    }

    /// Load every classified group in order, one group at a time
    pub async fn load_all(&self, pool: &PgPool, classified: &ClassifiedFiles) -> Result<Vec<GroupLoad>> {
        let loader = BatchLoader::from_config(pool.clone(), &self.config.load);
        let mut loads = Vec::new();

        for (kind, files) in classified.groups() {
            let started = Instant::now();
            info!(table = %kind, files = files.len(), "Loading group");

            let mut rows = 0;
            for path in files {
                rows += self.load_file(&loader, kind, path).await?;
            }

            let elapsed = started.elapsed();
            info!(
                table = %kind,
                rows = %format_count(rows),
                elapsed_secs = elapsed.as_secs_f64(),
                "Group loaded"
            );
            loads.push(GroupLoad {
                kind,
                files: files.len(),
                rows,
                elapsed,
            });
        }

        Ok(loads)
    }

    /// Read, transform and load one file according to its record type
    pub async fn load_file(&self, loader: &BatchLoader, kind: RecordKind, path: &Path) -> Result<u64> {
        let schema = TableSchema::for_kind(kind);
        let plan = ReadPlan::for_kind(kind, &self.config.load);
        let file = file_label(path);
        let started = Instant::now();

        let planned_lines = match plan {
            ReadPlan::PreScanned(window) => {
                let scan_path = path.to_path_buf();
                let lines = tokio::task::spawn_blocking(move || reader::count_lines(&scan_path)).await??;
                info!(
                    file = %file,
                    lines,
                    windows = reader::window_count(lines, window),
                    "Pre-scanned file"
                );
                Some(lines)
            },
            _ => None,
        };

        let pb = self.progress.rows(&format!("{} {}", kind, file), planned_lines.unwrap_or(0));
        let mut windows = RecordReader::open(path)?.windows(plan.window_rows());
        let mut source_width: Option<usize> = None;
        let mut window_index = 0u64;
        let mut loaded = 0u64;

        loop {
            let width = source_width;
            let (returned, next) = tokio::task::spawn_blocking(move || {
                let next = windows.next().map(|w| w.map(|raw| transform_raw(&schema, raw, width)));
                (windows, next)
            })
            .await?;
            windows = returned;

            let Some(window) = next else { break };
            let window = window?;
            window_index += 1;

            if source_width.is_none() {
                source_width = Some(window.source_width);
                if kind == RecordKind::Establishment {
                    info!(
                        file = %file,
                        layout = ?EstablishmentLayout::detect(window.first_width),
                        "Detected establishment layout"
                    );
                }
            }
            if planned_lines.is_none() {
                pb.inc_length(window.rows.len() as u64);
            }

            let read = window.rows.len();
            loaded += loader.load(&schema, window.rows, Some(&pb)).await.inspect_err(|e| {
                error!(file = %file, table = schema.table(), window = window_index, error = %e, "Batch insert failed");
            })?;

            if !matches!(plan, ReadPlan::Whole) {
                info!(
                    file = %file,
                    window = window_index,
                    rows = read,
                    total = windows.rows_read(),
                    "Window loaded"
                );
            }
        }

        pb.finish();
        info!(
            file = %file,
            table = schema.table(),
            rows = %format_count(loaded),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "File loaded"
        );
        Ok(loaded)
    }

    /// Resume after a run whose data loaded but whose indexes did not finish
    ///
    /// Refuses to build anything unless all ten tables exist and hold rows.
    pub async fn resume_indexes(&self) -> Result<IndexReport> {
        let pool = db::create_index_pool(&self.config.database).await?;
        let result = self.verified_index_build(&pool).await;
        pool.close().await;
        result
    }

    async fn verified_index_build(&self, pool: &PgPool) -> Result<IndexReport> {
        let integrity = db::verify_data_integrity(pool).await?;
        if !integrity.is_complete() {
            return Err(EtlError::IncompleteData(format!(
                "missing tables {:?}, empty tables {:?}; run a full load first",
                integrity.missing(),
                integrity.empty()
            )));
        }

        let report = IndexBuilder::new(pool.clone(), self.config.database.index_timeout())
            .build_all()
            .await?;
        if report.is_complete() {
            info!("All indexes present");
        } else {
            warn!(failed = ?report.failed(), "Some indexes are still missing; rerun to retry them");
        }
        Ok(report)
    }
}

/// A window of transformed rows and the field counts seen
struct TransformedWindow {
    rows: Vec<Row>,
    first_width: usize,
    source_width: usize,
}

fn transform_raw(schema: &TableSchema, raw: Vec<reader::RawRecord>, width: Option<usize>) -> TransformedWindow {
    let first_width = raw.first().map(Vec::len).unwrap_or(0);
    let source_width = width.unwrap_or_else(|| schema::source_width(schema, Some(first_width)));
    TransformedWindow {
        rows: transform::transform_window(schema, raw, source_width),
        first_width,
        source_width,
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_plans() {
        let config = LoadConfig::default();
        assert_eq!(
            ReadPlan::for_kind(RecordKind::Establishment, &config),
            ReadPlan::Windowed(2_000_000)
        );
        assert_eq!(
            ReadPlan::for_kind(RecordKind::TaxRegime, &config),
            ReadPlan::PreScanned(1_000_000)
        );
        assert_eq!(ReadPlan::for_kind(RecordKind::Company, &config), ReadPlan::Whole);
        assert_eq!(ReadPlan::for_kind(RecordKind::Country, &config), ReadPlan::Whole);
        assert_eq!(ReadPlan::Whole.window_rows(), usize::MAX);
    }

    #[test]
    fn test_transform_raw_detects_legacy_layout() {
        let schema = TableSchema::for_kind(RecordKind::Establishment);
        let window = transform_raw(&schema, vec![vec![String::from("12345678"); 29]], None);
        assert_eq!(window.first_width, 29);
        assert_eq!(window.source_width, 29);
        assert_eq!(window.rows[0].len(), 30);
        assert!(window.rows[0][29].is_null());

        let window = transform_raw(&schema, vec![vec![String::new(); 29]], Some(30));
        assert_eq!(window.source_width, 30);
    }

    #[test]
    fn test_source_report_completeness() {
        let mut report = SourceReport {
            listed: 1,
            ..SourceReport::default()
        };
        assert!(!report.is_complete());
        assert_eq!(report.missing_kinds().len(), 10);

        let names: Vec<String> = [
            "K.EMPRECSV", "K.ESTABELE", "K.SOCIOCSV", "F.SIMPLES.CSV", "F.CNAECSV",
            "F.MOTICSV", "F.MUNICCSV", "F.NATJUCSV", "F.PAISCSV", "F.QUALSCSV",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        report.classified = crate::classify::classify(&names);
        assert!(report.is_complete());
    }
}
