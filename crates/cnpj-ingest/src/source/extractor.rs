//! Archive extractor
//!
//! Unzips every downloaded archive into the shared extraction directory.
//! Each archive is handled on the blocking pool, a few at a time; a corrupt
//! or missing archive is recorded and the rest carry on.

use futures::stream::{self, StreamExt};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::error::Result;

/// Result of an extraction phase
#[derive(Debug, Default, Clone)]
pub struct ExtractionSummary {
    /// Archive name and the files it produced
    pub extracted: Vec<(String, Vec<PathBuf>)>,
    /// Archive name and why it was skipped
    pub failed: Vec<(String, String)>,
}

impl ExtractionSummary {
    /// Every extracted file, across all archives
    pub fn files(&self) -> Vec<PathBuf> {
        self.extracted
            .iter()
            .flat_map(|(_, files)| files.iter().cloned())
            .collect()
    }
}

/// Bounded pool of archive extraction workers
pub struct ArchiveExtractor {
    dest: PathBuf,
    workers: usize,
}

impl ArchiveExtractor {
    pub fn new(dest: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            dest: dest.into(),
            workers: workers.max(1),
        }
    }

    /// Extract all archives, at most `workers` at a time
    pub async fn extract_all(&self, archives: &[PathBuf]) -> ExtractionSummary {
        let started = Instant::now();
        info!(
            archives = archives.len(),
            workers = self.workers,
            dest = %self.dest.display(),
            "Extracting archives"
        );

        let results: Vec<(String, Result<Vec<PathBuf>>)> = stream::iter(archives.iter().cloned())
            .map(|archive| {
                let dest = self.dest.clone();
                async move {
                    let name = archive_name(&archive);
                    let joined =
                        tokio::task::spawn_blocking(move || extract_archive(&archive, &dest)).await;
                    let result = match joined {
                        Ok(result) => result,
                        Err(e) => Err(e.into()),
                    };
                    (name, result)
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut summary = ExtractionSummary::default();
        for (name, result) in results {
            match result {
                Ok(files) => {
                    info!(file = %name, entries = files.len(), "Extracted");
                    summary.extracted.push((name, files));
                },
                Err(e) => {
                    error!(file = %name, error = %e, "Extraction failed, skipping archive");
                    summary.failed.push((name, e.to_string()));
                },
            }
        }
        summary.extracted.sort_by(|a, b| a.0.cmp(&b.0));
        summary.failed.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            extracted = summary.extracted.len(),
            failed = summary.failed.len(),
            elapsed_secs = started.elapsed().as_secs(),
            "Extraction phase finished"
        );
        summary
    }
}

/// Extract every file entry of `archive` into `dest`
///
/// Entries whose path would escape `dest` are skipped.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    std::fs::create_dir_all(dest)?;

    let mut written = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(archive = %archive.display(), entry = %entry.name(), "Skipping unsafe entry path");
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = BufWriter::new(File::create(&target)?);
        let bytes = std::io::copy(&mut entry, &mut out)?;
        debug!(entry = %target.display(), bytes, "Entry written");
        written.push(target);
    }

    Ok(written)
}

fn archive_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
