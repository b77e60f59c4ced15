//! Batch upload preparation for the `prepare` command.
//!
//! Expands the command-line inputs into a list of photos, assigns each an
//! output file, and runs them through the [`ImagePreprocessor`] with bounded
//! concurrency. Progress is reported through an optional channel so the CLI
//! can print as results arrive.
//!
//! With `skip_existing`, photos whose output file is already there are left
//! alone, so an interrupted batch can be re-run cheaply. Failures can be
//! written to `failed.json` in the output directory for a later retry.
//!
//! ## Output naming
//!
//! ```text
//! shoots/
//! ├── a/seamaster.jpg   → out/seamaster.jpg
//! ├── b/seamaster.png   → out/seamaster-2.jpg   (stem already taken)
//! └── notes.txt         (skipped: not a photo)
//! ```

use crate::imaging::{OutputFormat, is_supported_extension};
use crate::preprocess::ImagePreprocessor;
use crate::types::SaliencyDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),
    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Name of the failure report within the output directory.
pub const FAILURE_REPORT: &str = "failed.json";

/// One photo and where its upload image goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareJob {
    /// 1-based position in the batch.
    pub index: usize,
    pub source: PathBuf,
    pub output: PathBuf,
}

/// Settings shared by every job in a batch.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub output_dir: PathBuf,
    pub max_dimension: u32,
    pub blur_background: bool,
    /// Photos in flight at once (at least 1).
    pub concurrency: usize,
    /// Leave outputs that already exist untouched.
    pub skip_existing: bool,
}

/// Progress report for a single photo.
#[derive(Debug, Clone)]
pub enum PrepareEvent {
    Prepared {
        index: usize,
        source: PathBuf,
        output: PathBuf,
        dimensions: (u32, u32),
        bytes: usize,
        descriptor: SaliencyDescriptor,
    },
    /// Output already present and `skip_existing` was set.
    Skipped {
        index: usize,
        source: PathBuf,
        output: PathBuf,
    },
    Failed {
        index: usize,
        source: PathBuf,
        reason: String,
    },
}

impl PrepareEvent {
    /// The failure this event reports, if any.
    pub fn failure(&self) -> Option<FailureRecord> {
        match self {
            PrepareEvent::Failed {
                index,
                source,
                reason,
            } => Some(FailureRecord {
                index: *index,
                source: source.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// One entry of the failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub index: usize,
    pub source: PathBuf,
    pub reason: String,
}

/// Totals for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub prepared: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Expand files and directories into photo paths.
///
/// Directories are walked recursively in file-name order, keeping files with
/// a supported extension. Files named explicitly are kept as given.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, PrepareError> {
    let mut photos = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    std::io::Error::other(format!("cannot walk {}: {e}", input.display()))
                })?;
                if entry.file_type().is_file() && has_photo_extension(entry.path()) {
                    photos.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            photos.push(input.clone());
        } else {
            return Err(PrepareError::InputNotFound(input.clone()));
        }
    }
    Ok(photos)
}

fn has_photo_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_supported_extension)
}

/// Assign each photo an output path `<output_dir>/<stem>.<ext>`, suffixing
/// `-2`, `-3`, ... when a stem repeats.
pub fn plan_jobs(photos: &[PathBuf], output_dir: &Path, format: OutputFormat) -> Vec<PrepareJob> {
    let mut taken = HashSet::new();
    photos
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("photo-{}", i + 1));
            let mut name = stem.clone();
            let mut n = 1;
            while !taken.insert(name.clone()) {
                n += 1;
                name = format!("{stem}-{n}");
            }
            PrepareJob {
                index: i + 1,
                source: source.clone(),
                output: output_dir.join(format!("{name}.{}", format.extension())),
            }
        })
        .collect()
}

/// Prepare every job, at most `settings.concurrency` at a time.
///
/// Per-photo failures are reported as [`PrepareEvent::Failed`] and counted;
/// only setup errors (e.g. an unwritable output directory) abort the batch.
pub async fn prepare_all(
    preprocessor: Arc<ImagePreprocessor>,
    jobs: Vec<PrepareJob>,
    settings: &BatchSettings,
    events: Option<Sender<PrepareEvent>>,
) -> Result<BatchSummary, PrepareError> {
    tokio::fs::create_dir_all(&settings.output_dir).await?;

    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for job in jobs {
        let preprocessor = preprocessor.clone();
        let semaphore = semaphore.clone();
        let settings = settings.clone();
        tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            prepare_one(&preprocessor, job, &settings).await
        });
    }

    let mut summary = BatchSummary::default();
    while let Some(joined) = tasks.join_next().await {
        let event = joined?;
        match &event {
            PrepareEvent::Prepared { .. } => summary.prepared += 1,
            PrepareEvent::Skipped { .. } => summary.skipped += 1,
            PrepareEvent::Failed { .. } => summary.failed += 1,
        }
        if let Some(tx) = &events {
            let _ = tx.send(event);
        }
    }
    Ok(summary)
}

async fn prepare_one(
    preprocessor: &ImagePreprocessor,
    job: PrepareJob,
    settings: &BatchSettings,
) -> PrepareEvent {
    if settings.skip_existing && tokio::fs::try_exists(&job.output).await.unwrap_or(false) {
        tracing::debug!(output = %job.output.display(), "output exists; skipping");
        return PrepareEvent::Skipped {
            index: job.index,
            source: job.source,
            output: job.output,
        };
    }

    let failed = |reason: String| PrepareEvent::Failed {
        index: job.index,
        source: job.source.clone(),
        reason,
    };

    let bytes = match tokio::fs::read(&job.source).await {
        Ok(bytes) => bytes,
        Err(e) => return failed(format!("cannot read: {e}")),
    };
    let Some(processed) = preprocessor
        .process_bytes(&bytes, settings.max_dimension, settings.blur_background, None)
        .await
    else {
        return failed("cannot decode or encode photo".to_string());
    };
    if let Err(e) = tokio::fs::write(&job.output, &processed.upload_bytes).await {
        return failed(format!("cannot write {}: {e}", job.output.display()));
    }

    tracing::debug!(source = %job.source.display(), output = %job.output.display(), "wrote upload image");
    PrepareEvent::Prepared {
        index: job.index,
        dimensions: processed.dimensions(),
        bytes: processed.upload_bytes.len(),
        descriptor: processed.descriptor,
        source: job.source,
        output: job.output,
    }
}

/// Write `failures`, ordered by batch position, to
/// `<output_dir>/failed.json`. With no failures, a report left by an earlier
/// run is removed. Returns the report path when one was written.
pub fn write_failure_report(
    output_dir: &Path,
    failures: &[FailureRecord],
) -> Result<Option<PathBuf>, PrepareError> {
    let path = output_dir.join(FAILURE_REPORT);
    if failures.is_empty() {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(None);
    }

    let mut sorted = failures.to_vec();
    sorted.sort_by_key(|f| f.index);
    std::fs::create_dir_all(output_dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(&sorted)?)?;
    Ok(Some(path))
}
