//! Core data model for backup runs.
//!
//! This module defines the values that flow through the pipeline:
//! - Tier: a named priority bucket with glob membership rules
//! - FileRecord: a scanned file with its assigned priority
//! - SelectionPlan: the capacity-bounded subset chosen for transfer
//! - CopyTask: one source/destination pair handed to the copy engine
//! - ManifestEntry, CopyStatus: the per-task outcome written to the manifest

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// A named priority bucket. Higher priority means more important.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub priority: i32,
    pub patterns: Vec<String>,
}

impl Tier {
    pub fn new(name: &str, priority: i32, patterns: &[&str]) -> Self {
        Tier {
            name: name.to_string(),
            priority,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// A regular file found during scanning. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute source path
    pub path: PathBuf,

    /// Size in bytes at scan time
    pub size: u64,

    /// Modification time at scan time
    pub modified: SystemTime,

    /// Priority assigned by the classifier (0 when no tier matched)
    pub priority: i32,
}

/// Selection strategy within a priority group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Objective {
    /// Favor many small files (ascending size)
    #[default]
    Count,
    /// Favor filling capacity with large files (descending size)
    Space,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::Count => write!(f, "count"),
            Objective::Space => write!(f, "space"),
        }
    }
}

impl FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "count" => Ok(Objective::Count),
            "space" => Ok(Objective::Space),
            other => Err(format!(
                "Invalid objective '{}'. Must be 'count' or 'space'",
                other
            )),
        }
    }
}

/// The ordered, capacity-bounded set of files chosen for transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPlan {
    /// Selected records in selection order (priority desc, then objective order)
    pub records: Vec<FileRecord>,

    /// Sum of selected sizes; never exceeds the capacity passed to `select`
    pub used_bytes: u64,
}

impl SelectionPlan {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Selected file counts per priority, highest priority first, truncated to `top`.
    pub fn priority_breakdown(&self, top: usize) -> Vec<(i32, usize)> {
        let mut counts: Vec<(i32, usize)> = Vec::new();
        for record in &self.records {
            match counts.iter_mut().find(|(p, _)| *p == record.priority) {
                Some((_, c)) => *c += 1,
                None => counts.push((record.priority, 1)),
            }
        }
        counts.sort_by(|a, b| b.0.cmp(&a.0));
        counts.truncate(top);
        counts
    }
}

/// One unit of work for the copy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTask {
    pub source: PathBuf,
    pub destination: PathBuf,

    /// Planned size and mtime, used for manifest entries when the source
    /// cannot be re-read (e.g. cancelled before start)
    pub size: u64,
    pub modified: SystemTime,
    pub priority: i32,
}

/// Outcome of a single copy task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    /// Bytes transferred and renamed into place
    Copied,
    /// Destination already present with the same size
    Skipped,
    /// An I/O error occurred; destination left untouched
    Error,
    /// Cancellation observed before or during transfer
    Cancelled,
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyStatus::Copied => write!(f, "copied"),
            CopyStatus::Skipped => write!(f, "skipped"),
            CopyStatus::Error => write!(f, "error"),
            CopyStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One manifest line. Exactly one is written per completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Paths that are not valid UTF-8 are written lossily
    #[serde(serialize_with = "serialize_path_lossy")]
    pub src: PathBuf,
    #[serde(serialize_with = "serialize_path_lossy")]
    pub dst: PathBuf,
    pub size: u64,

    /// Source modification time, unix seconds
    pub mtime: i64,
    pub priority: i32,
    pub status: CopyStatus,
    pub message: String,

    /// Completion time, fractional unix seconds
    pub ts: f64,
}

impl ManifestEntry {
    pub fn new(
        task: &CopyTask,
        size: u64,
        modified: SystemTime,
        status: CopyStatus,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        ManifestEntry {
            src: task.source.clone(),
            dst: task.destination.clone(),
            size,
            mtime: DateTime::<Utc>::from(modified).timestamp(),
            priority: task.priority,
            status,
            message: message.into(),
            ts: now.timestamp_micros() as f64 / 1e6,
        }
    }
}

fn serialize_path_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

/// Final tallies of a copy run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub copied: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.copied + self.skipped + self.errors + self.cancelled
    }
}

/// The state of a backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, destination validated
    Pending,
    /// Scanned and selected; tasks derived
    Planned,
    /// Copy engine executing
    Running,
    /// All tasks drained (some may have failed or been cancelled)
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Planned => "planned",
            JobState::Running => "running",
            JobState::Completed => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(priority: i32) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/src/f"),
            size: 1,
            modified: SystemTime::UNIX_EPOCH,
            priority,
        }
    }

    #[test]
    fn test_objective_parse() {
        assert_eq!("count".parse::<Objective>(), Ok(Objective::Count));
        assert_eq!("SPACE".parse::<Objective>(), Ok(Objective::Space));
        assert!("biggest".parse::<Objective>().is_err());
    }

    #[test]
    fn test_priority_breakdown_orders_and_truncates() {
        let plan = SelectionPlan {
            records: vec![record(10), record(100), record(10), record(50), record(90)],
            used_bytes: 5,
        };
        assert_eq!(plan.priority_breakdown(3), vec![(100, 1), (90, 1), (50, 1)]);
        assert_eq!(plan.priority_breakdown(10).last(), Some(&(10, 2)));
    }

    #[test]
    fn test_manifest_entry_serializes_lowercase_status() {
        let task = CopyTask {
            source: PathBuf::from("/src/a.txt"),
            destination: PathBuf::from("/dst/a.txt"),
            size: 3,
            modified: SystemTime::UNIX_EPOCH,
            priority: 100,
        };
        let entry = ManifestEntry::new(&task, 3, SystemTime::UNIX_EPOCH, CopyStatus::Skipped, "exists-same-size");
        let line = serde_json::to_string(&entry).expect("Failed to serialize");
        assert!(line.contains("\"status\":\"skipped\""));
        assert!(line.contains("\"mtime\":0"));
        assert!(line.contains("\"priority\":100"));
    }

    #[cfg(unix)]
    #[test]
    fn test_manifest_entry_serializes_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"caf\xe9.txt");
        let task = CopyTask {
            source: PathBuf::from("/src").join(name),
            destination: PathBuf::from("/dst").join(name),
            size: 4,
            modified: SystemTime::UNIX_EPOCH,
            priority: 10,
        };
        let entry = ManifestEntry::new(&task, 4, SystemTime::UNIX_EPOCH, CopyStatus::Copied, "ok");
        let line = serde_json::to_string(&entry).expect("Failed to serialize");
        assert!(line.contains("\"src\":\"/src/caf\u{FFFD}.txt\""));

        let parsed: ManifestEntry = serde_json::from_str(&line).expect("Failed to parse");
        assert_eq!(parsed.dst, PathBuf::from("/dst/caf\u{FFFD}.txt"));
    }
}
