//! # USB Backup Engine - Prioritized Backup Library
//!
//! A headless engine that picks the most important files from one or more
//! source trees and copies as many as fit onto a capacity-limited device.
//! Designed as the foundation for front-ends (CLI, automation).
//!
//! ## Overview
//!
//! A run has two phases. Planning is single-threaded: scan the sources,
//! score each file against importance tiers, and select a capacity-bounded
//! subset with a per-priority greedy packing. Execution is concurrent: a
//! fixed pool of workers copies each selected file through a temporary file
//! and an atomic rename, skipping files already present with the same size,
//! and appends one JSON line per outcome to a manifest.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{create_job, plan_job, run_job, CancelToken, EngineConfig, JobOptions, Objective};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut job = create_job(JobOptions {
//!     sources: vec!["~/Documents".into()],
//!     device_root: "/media/usb".into(),
//!     destination: "/media/usb/backup".into(),
//!     objective: Objective::Count,
//!     capacity: 16 << 30,
//!     tiers: Vec::new(),
//!     extra_excludes: Vec::new(),
//!     config: EngineConfig::default(),
//! })?;
//!
//! let cancel = CancelToken::new();
//! plan_job(&mut job, &cancel, None)?;
//! println!("Will copy {} files", job.stats.pending_files);
//!
//! let summary = run_job(&mut job, &cancel, None)?;
//! println!("copied={} skipped={} errors={}", summary.copied, summary.skipped, summary.errors);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (Tier, FileRecord, CopyTask, ManifestEntry)
//! - **error**: Error types and handling
//! - **config**: Immutable engine configuration and throughput modes
//! - **profile**: Importance profile loading and built-in tiers
//! - **classify**: Tier matching and exclude globs
//! - **scan**: Source tree traversal
//! - **select**: Capacity-aware selection
//! - **copy**: Concurrent copy engine
//! - **fs_ops**: Low-level filesystem operations and copy strategies
//! - **pool**: Reusable I/O buffers
//! - **manifest**: JSON-lines outcome log
//! - **progress**: Shared progress counters and the sink trait
//! - **cancel**: Cooperative cancellation
//! - **platform**: Free space, access hints, process priority
//! - **job**: Job orchestration (create, plan, run)

pub mod model;
pub mod error;
pub mod config;
pub mod profile;
pub mod classify;
pub mod scan;
pub mod select;
pub mod copy;
pub mod fs_ops;
pub mod pool;
pub mod manifest;
pub mod progress;
pub mod cancel;
pub mod platform;
pub mod job;

// Re-export main types and functions
pub use model::{
    CopyStatus, CopyTask, FileRecord, JobState, ManifestEntry, Objective, RunSummary,
    SelectionPlan, Tier,
};
pub use error::EngineError;
pub use config::{EngineConfig, ThroughputMode};
pub use profile::{default_tiers, load_profile, load_profile_or_default, resolve_profile_path};
pub use classify::{Classifier, ExcludeSet};
pub use scan::scan;
pub use select::select;
pub use copy::CopyEngine;
pub use manifest::ManifestWriter;
pub use progress::{ChannelSink, ProgressSink, ProgressSnapshot, ProgressState};
pub use cancel::{CancelToken, SignalOutcome};
pub use pool::BufferPool;
pub use job::{
    create_job, destination_dir, plan_job, relative_dest_path, run_job, BackupJob, JobOptions,
    PlanStats,
};
