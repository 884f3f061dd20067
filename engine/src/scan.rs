//! Source tree scanning.
//!
//! Walks each source root with an explicit stack, prunes excluded directories,
//! skips symlinks and non-regular files, and records every surviving file with
//! its size, mtime and classifier priority. Unreadable directories are skipped.
//! Cancellation returns whatever was collected so far.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::classify::{Classifier, ExcludeSet};
use crate::config::EngineConfig;
use crate::model::FileRecord;
use crate::progress::{emit, ProgressSink};

/// True when `path` equals `base` or lies beneath it.
pub fn is_under(path: &Path, base: &Path) -> bool {
    !base.as_os_str().is_empty() && path.starts_with(base)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Resolve source roots to absolute, existing directories.
///
/// Roots that do not exist or are not directories are dropped with a debug
/// log. Duplicates and roots nested inside another root are dropped too, so
/// no file is scanned twice. The order of the remaining roots is preserved.
pub fn resolve_roots<P: AsRef<Path>>(roots: &[P]) -> Vec<PathBuf> {
    let resolved: Vec<PathBuf> = roots
        .iter()
        .filter_map(|root| {
            let expanded = expand_home(root.as_ref());
            match fs::canonicalize(&expanded) {
                Ok(abs) if abs.is_dir() => Some(abs),
                Ok(abs) => {
                    debug!(root = %abs.display(), "source root is not a directory, skipping");
                    None
                }
                Err(e) => {
                    debug!(root = %expanded.display(), "source root unavailable, skipping: {}", e);
                    None
                }
            }
        })
        .collect();

    let mut kept: Vec<PathBuf> = Vec::with_capacity(resolved.len());
    for root in &resolved {
        if kept.contains(root) {
            continue;
        }
        if let Some(outer) = resolved.iter().find(|other| *other != root && is_under(root, other)) {
            debug!(root = %root.display(), outer = %outer.display(), "source root is inside another root, skipping");
            continue;
        }
        kept.push(root.clone());
    }
    kept
}

/// Scan source roots into file records.
///
/// `roots` should already be absolute (see `resolve_roots`). Any root under
/// `destination_root` is skipped entirely, and a directory equal to
/// `destination_root` is pruned wherever it appears.
pub fn scan(
    roots: &[PathBuf],
    classifier: &Classifier,
    excludes: &ExcludeSet,
    destination_root: &Path,
    cancel: &CancelToken,
    config: &EngineConfig,
    sink: Option<&dyn ProgressSink>,
) -> Vec<FileRecord> {
    let destination_root =
        fs::canonicalize(destination_root).unwrap_or_else(|_| destination_root.to_path_buf());
    let mut records = Vec::new();
    let mut last_report = Instant::now();

    for root in roots {
        if cancel.is_cancelled() {
            emit(sink, || "Scan cancelled".to_string());
            return records;
        }
        if is_under(root, &destination_root) {
            info!(root = %root.display(), "source root is on the destination device, skipping");
            emit(sink, || format!("Auto-excluded (destination): {}", root.display()));
            continue;
        }

        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %dir.display(), "skipping unreadable directory: {}", e);
                    continue;
                }
            };
            let mut entries: Vec<fs::DirEntry> = entries.filter_map(Result::ok).collect();
            entries.sort_by_key(|entry| entry.file_name());

            for entry in entries {
                if cancel.is_cancelled() {
                    emit(sink, || "Scan cancelled".to_string());
                    return records;
                }

                let path = entry.path();
                // file_type does not follow symlinks
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };

                if file_type.is_dir() {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if config.excluded_dir_names.iter().any(|n| n == name.as_ref())
                        || excludes.is_excluded_within(root, &path)
                        || path == destination_root
                    {
                        continue;
                    }
                    stack.push(path);
                    continue;
                }

                if !file_type.is_file() || excludes.is_excluded_within(root, &path) {
                    continue;
                }
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };

                records.push(FileRecord {
                    priority: classifier.priority_of(&path),
                    size: metadata.len(),
                    modified: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
                    path,
                });

                if last_report.elapsed() >= config.scan_report_interval {
                    let found = records.len();
                    emit(sink, || format!("Scanning: {} files found...", found));
                    last_report = Instant::now();
                }
            }
        }
    }

    records
}
