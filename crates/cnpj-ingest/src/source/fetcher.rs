//! Archive fetcher
//!
//! Downloads archives with bounded concurrency. An archive whose local copy
//! already matches the remote `Content-Length` is left alone. Bytes are
//! streamed to a `.part` file and renamed into place only once complete, so
//! an interrupted run never leaves a truncated archive under the final name.

use cnpj_common::format::{format_bytes, Milestones};
use futures::future::join_all;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{EtlError, Result};
use crate::progress::Progress;
use crate::source::retry::RetryPolicy;

/// Write buffer for streamed downloads
const CHUNK_SIZE: usize = 64 * 1024;

/// Downloads report at `info` every tenth of their size
const DOWNLOAD_LOG_STEP_PERCENT: f64 = 10.0;

/// One archive to bring up to date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub name: String,
    pub url: String,
    pub path: PathBuf,
}

/// What happened to a single archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { bytes: u64 },
    /// Local copy already matched the remote size
    Current,
    Failed { reason: String },
}

/// Per-archive outcomes of a fetch phase, in listing order
#[derive(Debug, Default, Clone)]
pub struct FetchSummary {
    pub outcomes: Vec<(String, FetchOutcome)>,
}

impl FetchSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Downloaded { .. }))
    }

    pub fn current(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Current))
    }

    /// Archives present locally after the phase
    pub fn available(&self) -> usize {
        self.downloaded() + self.current()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FetchOutcome::Failed { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn count(&self, pred: impl Fn(&FetchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Conditional, retrying archive downloader
pub struct ArchiveFetcher {
    client: Client,
    retry: RetryPolicy,
    concurrency: usize,
    progress: Progress,
}

impl ArchiveFetcher {
    pub fn new(client: Client, retry: RetryPolicy, concurrency: usize, progress: Progress) -> Self {
        Self {
            client,
            retry,
            concurrency: concurrency.max(1),
            progress,
        }
    }

    /// Decide whether `url` has to be (re)downloaded to `path`
    ///
    /// A local file whose size differs from the remote `Content-Length` is
    /// deleted before returning `true`. A missing header counts as a mismatch.
    pub async fn should_download(&self, url: &str, path: &Path) -> Result<bool> {
        let local_size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let response = self.client.head(url).send().await?;
        if !response.status().is_success() {
            return Err(EtlError::download(url, format!("HEAD returned HTTP {}", response.status())));
        }

        // Read the header itself; the body-size hint of a HEAD response is always zero
        let remote_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        if remote_size == Some(local_size) {
            debug!(path = %path.display(), size = local_size, "Local archive matches remote size");
            return Ok(false);
        }

        info!(
            path = %path.display(),
            local = local_size,
            remote = ?remote_size,
            "Local archive is stale, removing"
        );
        tokio::fs::remove_file(path).await?;
        Ok(true)
    }

    /// Download `url` to `path` under the retry policy, returning bytes written
    pub async fn fetch(&self, url: &str, path: &Path) -> Result<u64> {
        self.retry
            .run(url, move |attempt| self.fetch_once(url, path, attempt))
            .await
    }

    async fn fetch_once(&self, url: &str, path: &Path, attempt: u32) -> Result<u64> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(EtlError::download(url, format!("HTTP {}", response.status())));
        }

        let total = response.content_length();
        let name = file_label(path);
        let pb = self.progress.download(&name, total);
        if attempt > 1 {
            pb.set_message(format!("{} (attempt {})", name, attempt));
        }

        let part = part_path(path);
        let result = stream_to_file(response, &part, total, &pb, &name).await;
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                pb.abandon();
                discard_partial(&part).await;
                return Err(e);
            },
        };

        if let Some(expected) = total {
            if written != expected {
                pb.abandon();
                discard_partial(&part).await;
                return Err(EtlError::download(
                    url,
                    format!("body ended after {} of {} bytes", written, expected),
                ));
            }
        }

        tokio::fs::rename(&part, path).await?;
        pb.finish();
        Ok(written)
    }

    /// Bring every target up to date, at most `concurrency` at a time
    ///
    /// Failures are logged and recorded; they never cancel other downloads.
    pub async fn fetch_all(&self, targets: &[ArchiveTarget]) -> FetchSummary {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        info!(
            archives = targets.len(),
            concurrency = self.concurrency,
            "Starting downloads"
        );

        let tasks = targets.iter().map(|target| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let outcome = match semaphore.acquire().await {
                    Ok(_permit) => self.fetch_target(target).await,
                    Err(e) => FetchOutcome::Failed {
                        reason: e.to_string(),
                    },
                };
                (target.name.clone(), outcome)
            }
        });

        FetchSummary {
            outcomes: join_all(tasks).await,
        }
    }

    async fn fetch_target(&self, target: &ArchiveTarget) -> FetchOutcome {
        let needed = match self.should_download(&target.url, &target.path).await {
            Ok(needed) => needed,
            Err(e) => {
                warn!(file = %target.name, error = %e, "Size check failed, downloading anyway");
                if let Err(e) = remove_if_exists(&target.path).await {
                    return FetchOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
                true
            },
        };

        if !needed {
            info!(file = %target.name, "Already downloaded, skipping");
            return FetchOutcome::Current;
        }

        let started = Instant::now();
        info!(file = %target.name, url = %target.url, "Downloading");
        match self.fetch(&target.url, &target.path).await {
            Ok(bytes) => {
                info!(
                    file = %target.name,
                    size = %format_bytes(bytes),
                    elapsed_secs = started.elapsed().as_secs(),
                    "Download complete"
                );
                FetchOutcome::Downloaded { bytes }
            },
            Err(e) => {
                error!(file = %target.name, error = %e, "Download failed");
                FetchOutcome::Failed {
                    reason: e.to_string(),
                }
            },
        }
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    part: &Path,
    total: Option<u64>,
    pb: &indicatif::ProgressBar,
    name: &str,
) -> Result<u64> {
    let file = tokio::fs::File::create(part).await?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut milestones = Milestones::new(DOWNLOAD_LOG_STEP_PERCENT);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
        pb.set_position(written);

        if let Some(total) = total {
            if let Some(pct) = milestones.reached(written, total) {
                info!(
                    file = %name,
                    "{:.0}% downloaded ({}/{})",
                    pct,
                    format_bytes(written),
                    format_bytes(total)
                );
            }
        }
    }

    writer.flush().await?;
    Ok(written)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Remove a partial download; `true` when nothing is left behind
async fn discard_partial(part: &Path) -> bool {
    match remove_if_exists(part).await {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %part.display(), error = %e, "Could not remove partial download");
            false
        },
    }
}
