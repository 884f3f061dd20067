//! Immutable engine configuration.
//!
//! An `EngineConfig` is built once at startup (usually from a `ThroughputMode`)
//! and passed by reference into the scanner, selector and copy engine. Nothing
//! in the engine mutates it afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Directory names pruned during scanning without descending.
pub const EXCLUDED_DIR_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    ".cache",
    ".npm",
    ".gradle",
    ".m2",
    ".venv",
    "venv",
    "env",
    ".tox",
    ".idea",
    ".vscode",
    ".DS_Store",
];

/// Exclude globs applied to every scan in addition to user patterns.
pub const DEFAULT_EXCLUDE_GLOBS: &[&str] = &[
    "*/.Trash/*",
    "*/.local/share/Trash/*",
    "*/.thumbnails/*",
    "*/Temp/*",
    "*/tmp/*",
];

pub const MANIFEST_FILE_NAME: &str = "backup-manifest.jsonl";
pub const TEMP_SUFFIX: &str = ".part";

const KIB: usize = 1 << 10;
const MIB: usize = 1 << 20;

/// Media speed heuristics selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThroughputMode {
    /// Spinning disks and USB sticks
    #[default]
    Standard,
    /// Very fast SSD/NVMe: more files take the single-write path, and large
    /// files go through the platform bulk copy
    FastSsd,
    /// FastSsd heuristics plus a best-effort process priority raise
    Boost,
}

impl ThroughputMode {
    pub fn is_fast(&self) -> bool {
        matches!(self, ThroughputMode::FastSsd | ThroughputMode::Boost)
    }
}

impl fmt::Display for ThroughputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThroughputMode::Standard => write!(f, "standard"),
            ThroughputMode::FastSsd => write!(f, "fast-ssd"),
            ThroughputMode::Boost => write!(f, "boost"),
        }
    }
}

impl FromStr for ThroughputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(ThroughputMode::Standard),
            "fast-ssd" | "fast" => Ok(ThroughputMode::FastSsd),
            "boost" => Ok(ThroughputMode::Boost),
            other => Err(format!("Invalid throughput mode '{}'", other)),
        }
    }
}

/// Configuration shared read-only by every pipeline stage.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Files at or below this size are read whole into a pooled buffer
    pub small_file_threshold: usize,

    /// Files at or above this size take the bulk-copy path when enabled
    pub large_direct_threshold: u64,

    /// Whether the bulk-copy path is used at all
    pub large_direct_enabled: bool,

    /// Buffer size for the chunked path
    pub chunk_size: usize,

    /// Parallel copy workers
    pub workers: usize,

    /// Task queue capacity is `workers * queue_depth_factor`
    pub queue_depth_factor: usize,

    /// Idle buffers each pool keeps around for reuse
    pub pool_retain: usize,

    pub excluded_dir_names: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub manifest_file_name: String,
    pub temp_suffix: String,

    /// Minimum spacing of "Scanning: N files found..." lines
    pub scan_report_interval: Duration,

    /// Minimum spacing of per-file progress lines on the chunked path
    pub file_progress_interval: Duration,

    /// Sync the temporary file to disk before renaming it into place
    pub sync_before_rename: bool,

    pub mode: ThroughputMode,
}

impl EngineConfig {
    /// Build the configuration for a throughput mode with default workers.
    pub fn for_mode(mode: ThroughputMode) -> Self {
        let mut config = EngineConfig {
            small_file_threshold: 256 * KIB,
            large_direct_threshold: 32 * MIB as u64,
            large_direct_enabled: false,
            chunk_size: 8 * MIB,
            workers: num_cpus::get().max(1),
            queue_depth_factor: 2,
            pool_retain: 64,
            excluded_dir_names: EXCLUDED_DIR_NAMES.iter().map(|s| s.to_string()).collect(),
            exclude_globs: DEFAULT_EXCLUDE_GLOBS.iter().map(|s| s.to_string()).collect(),
            manifest_file_name: MANIFEST_FILE_NAME.to_string(),
            temp_suffix: TEMP_SUFFIX.to_string(),
            scan_report_interval: Duration::from_millis(500),
            file_progress_interval: Duration::from_secs(1),
            sync_before_rename: true,
            mode,
        };
        if mode.is_fast() {
            config.small_file_threshold = 512 * KIB;
            config.large_direct_threshold = 16 * MIB as u64;
            config.large_direct_enabled = true;
        }
        config
    }

    /// Override the worker count; 0 keeps the processor-count default.
    pub fn with_workers(mut self, workers: usize) -> Self {
        if workers > 0 {
            self.workers = workers;
        }
        self
    }

    pub fn queue_capacity(&self) -> usize {
        (self.workers.max(1) * self.queue_depth_factor).max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_mode(ThroughputMode::Standard)
    }
}
