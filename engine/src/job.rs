//! Job orchestration module.
//!
//! This module provides the main job lifecycle functions:
//! - Creating a job against a destination directory on the device
//! - Planning a job (scan, classify, select, derive copy tasks)
//! - Running a job (executing the copy engine over the plan)
//!
//! A job moves Pending -> Planned -> Running -> Completed. Calling the
//! lifecycle functions out of order is an error.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Local;
use tracing::info;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::classify::{Classifier, ExcludeSet};
use crate::config::EngineConfig;
use crate::copy::CopyEngine;
use crate::error::EngineError;
use crate::fs_ops;
use crate::manifest::ManifestWriter;
use crate::model::{CopyTask, JobState, Objective, RunSummary, SelectionPlan, Tier};
use crate::progress::{emit, ProgressSink, ProgressState};
use crate::scan;
use crate::select::select;

/// Everything needed to create a job.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Source roots as given; `~` is expanded at plan time
    pub sources: Vec<PathBuf>,

    /// Root of the destination device. Sources under it are never scanned.
    pub device_root: PathBuf,

    /// Directory the backup tree is written into (created if missing)
    pub destination: PathBuf,

    pub objective: Objective,

    /// Selection capacity in bytes, already reduced by any reservation
    pub capacity: u64,

    /// Tiers in descending priority; empty means the built-in tiers
    pub tiers: Vec<Tier>,

    /// User exclude globs, added to the configured defaults
    pub extra_excludes: Vec<String>,

    pub config: EngineConfig,
}

/// Numbers gathered while planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub scanned_files: usize,
    pub scanned_bytes: u64,
    pub scan_duration: Duration,

    /// Selected files already at the destination with the same size
    pub already_present: usize,
    pub already_present_bytes: u64,

    /// Selected files still to transfer, and their bytes
    pub pending_files: usize,
    pub pending_bytes: u64,
}

/// A backup job and its plan.
#[derive(Debug)]
pub struct BackupJob {
    pub id: Uuid,
    pub state: JobState,
    pub options: JobOptions,

    /// Source roots that resolved to existing directories
    pub roots: Vec<PathBuf>,

    pub plan: SelectionPlan,
    pub tasks: Vec<CopyTask>,
    pub stats: PlanStats,

    /// Bytes written during the run
    pub bytes_transferred: u64,
    pub summary: Option<RunSummary>,

    pub created_at: SystemTime,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

impl BackupJob {
    pub fn destination(&self) -> &Path {
        &self.options.destination
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.options
            .destination
            .join(&self.options.config.manifest_file_name)
    }
}

/// Pick the destination directory on the device.
///
/// With no sub-folder the destination is a fresh `backup_YYYYMMDD_HHMMSS`
/// directory, or the device root itself when resuming.
///
/// # Errors
/// Returns `InvalidPath` for sub-folders containing `..` or starting with a
/// separator.
pub fn destination_dir(
    device_root: &Path,
    subdir: Option<&str>,
    resume: bool,
) -> Result<PathBuf, EngineError> {
    let subdir = subdir.map(str::trim).filter(|s| !s.is_empty());
    let Some(subdir) = subdir else {
        if resume {
            return Ok(device_root.to_path_buf());
        }
        let name = format!("backup_{}", Local::now().format("%Y%m%d_%H%M%S"));
        return Ok(device_root.join(name));
    };

    let candidate = Path::new(subdir);
    let traversal = subdir.contains("..")
        || subdir.starts_with('/')
        || subdir.starts_with('\\')
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if traversal {
        return Err(EngineError::InvalidPath {
            path: candidate.to_path_buf(),
            reason: "destination sub-folder must stay inside the device root".to_string(),
        });
    }
    Ok(device_root.join(candidate))
}

/// Destination path for `source` relative to the longest root containing it.
///
/// Files under no root fall back to their file name.
pub fn relative_dest_path(source: &Path, roots: &[PathBuf]) -> PathBuf {
    let best = roots
        .iter()
        .filter(|root| scan::is_under(source, root))
        .max_by_key(|root| root.as_os_str().len());

    match best.and_then(|root| source.strip_prefix(root).ok()) {
        Some(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| source.to_path_buf()),
    }
}

/// Create a new backup job.
///
/// The destination directory is created if needed. An unusable destination
/// is the one condition that stops a job before it starts.
///
/// # Errors
/// Returns `InvalidPath` for an empty destination and `DestinationUnusable`
/// when it cannot be created or is not a directory.
pub fn create_job(options: JobOptions) -> Result<BackupJob, EngineError> {
    if options.destination.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: options.destination.clone(),
            reason: "Destination path is empty".to_string(),
        });
    }

    let mut options = options;
    let requested = options.destination.clone();
    let unusable = |e: io::Error| EngineError::DestinationUnusable {
        path: requested.clone(),
        source: e,
    };
    fs::create_dir_all(&requested).map_err(unusable)?;
    let metadata = fs::metadata(&requested).map_err(unusable)?;
    if !metadata.is_dir() {
        return Err(unusable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Destination exists but is not a directory",
        )));
    }

    options.destination = fs::canonicalize(&requested).map_err(unusable)?;
    if let Ok(root) = fs::canonicalize(&options.device_root) {
        options.device_root = root;
    }

    let job = BackupJob {
        id: Uuid::new_v4(),
        state: JobState::Pending,
        options,
        roots: Vec::new(),
        plan: SelectionPlan::default(),
        tasks: Vec::new(),
        stats: PlanStats::default(),
        bytes_transferred: 0,
        summary: None,
        created_at: SystemTime::now(),
        start_time: None,
        end_time: None,
    };
    info!(job = %job.id, destination = %job.destination().display(), "created backup job");
    Ok(job)
}

/// Plan a job: scan the sources, select within capacity, derive tasks.
///
/// A cancelled scan still produces a plan from what was found; the run will
/// then record those tasks as cancelled.
///
/// # Errors
/// Returns `InvalidState` unless the job is Pending, `SourceNotFound` when no
/// source root exists, and `InvalidPattern` for a bad exclude glob.
pub fn plan_job(
    job: &mut BackupJob,
    cancel: &CancelToken,
    sink: Option<&dyn ProgressSink>,
) -> Result<(), EngineError> {
    if job.state != JobState::Pending {
        return Err(EngineError::InvalidState {
            expected: JobState::Pending.as_str(),
            actual: job.state.as_str(),
        });
    }

    let options = &job.options;
    let roots = scan::resolve_roots(&options.sources);
    if roots.is_empty() {
        return Err(EngineError::SourceNotFound {
            path: options.sources.first().cloned().unwrap_or_default(),
        });
    }

    let patterns: Vec<&str> = options
        .config
        .exclude_globs
        .iter()
        .chain(options.extra_excludes.iter())
        .map(String::as_str)
        .collect();
    let excludes = ExcludeSet::new(&patterns)?;
    let classifier = Classifier::new(&options.tiers);

    emit(sink, || "Starting scan...".to_string());
    let started = Instant::now();
    let records = scan::scan(
        &roots,
        &classifier,
        &excludes,
        &options.device_root,
        cancel,
        &options.config,
        sink,
    );

    let mut stats = PlanStats {
        scanned_files: records.len(),
        scanned_bytes: records.iter().map(|r| r.size).sum(),
        scan_duration: started.elapsed(),
        ..PlanStats::default()
    };

    let plan = select(&records, options.capacity, options.objective);

    let tasks: Vec<CopyTask> = plan
        .records
        .iter()
        .map(|record| CopyTask {
            destination: options
                .destination
                .join(relative_dest_path(&record.path, &roots)),
            source: record.path.clone(),
            size: record.size,
            modified: record.modified,
            priority: record.priority,
        })
        .collect();

    for task in &tasks {
        if fs_ops::exists_with_size(&task.destination, task.size) {
            stats.already_present += 1;
            stats.already_present_bytes += task.size;
        } else {
            stats.pending_files += 1;
            stats.pending_bytes += task.size;
        }
    }

    info!(
        job = %job.id,
        scanned = stats.scanned_files,
        selected = plan.len(),
        used_bytes = plan.used_bytes,
        already_present = stats.already_present,
        "planned backup job"
    );

    job.roots = roots;
    job.plan = plan;
    job.tasks = tasks;
    job.stats = stats;
    job.state = JobState::Planned;
    Ok(())
}

/// Run a planned job.
///
/// Individual file errors are recorded in the manifest and the summary; they
/// never make this function fail.
///
/// # Errors
/// Returns `InvalidState` unless the job is Planned.
pub fn run_job(
    job: &mut BackupJob,
    cancel: &CancelToken,
    sink: Option<&dyn ProgressSink>,
) -> Result<RunSummary, EngineError> {
    if job.state != JobState::Planned {
        return Err(EngineError::InvalidState {
            expected: JobState::Planned.as_str(),
            actual: job.state.as_str(),
        });
    }

    job.state = JobState::Running;
    job.start_time = Some(SystemTime::now());

    let config = &job.options.config;
    let progress = Arc::new(ProgressState::new(job.stats.pending_bytes));
    let manifest = ManifestWriter::open_or_disabled(&job.manifest_path());
    let engine = CopyEngine::new(config, Arc::clone(&progress), manifest);

    let summary = engine.run(job.tasks.clone(), config.workers, cancel, sink);

    job.bytes_transferred = progress.transferred();
    job.summary = Some(summary);
    job.state = JobState::Completed;
    job.end_time = Some(SystemTime::now());
    Ok(summary)
}
