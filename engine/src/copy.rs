//! Concurrent copy engine.
//!
//! A dispatcher feeds `CopyTask`s into a bounded queue drained by a fixed set
//! of scoped worker threads. Every task ends in exactly one manifest entry.
//! Once cancellation is observed the dispatcher stops enqueueing and records
//! the remaining tasks as cancelled; workers finish or abandon the file they
//! hold and drain what is already queued the same way.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::fs_ops::{self, TransferContext};
use crate::manifest::ManifestWriter;
use crate::model::{CopyStatus, CopyTask, ManifestEntry, RunSummary};
use crate::pool::BufferPool;
use crate::progress::{emit, human_size, ProgressSink, ProgressState};

/// Owns the buffer pools, shared progress and manifest for one run.
#[derive(Debug)]
pub struct CopyEngine {
    config: EngineConfig,
    small_pool: BufferPool,
    chunk_pool: BufferPool,
    progress: Arc<ProgressState>,
    manifest: ManifestWriter,
}

#[derive(Default)]
struct Tally {
    copied: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
    cancelled: AtomicUsize,
}

impl Tally {
    fn record(&self, status: CopyStatus) {
        let counter = match status {
            CopyStatus::Copied => &self.copied,
            CopyStatus::Skipped => &self.skipped,
            CopyStatus::Error => &self.errors,
            CopyStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            copied: self.copied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl CopyEngine {
    pub fn new(config: &EngineConfig, progress: Arc<ProgressState>, manifest: ManifestWriter) -> Self {
        CopyEngine {
            small_pool: BufferPool::new(config.small_file_threshold, config.pool_retain),
            chunk_pool: BufferPool::new(config.chunk_size, config.pool_retain),
            config: config.clone(),
            progress,
            manifest,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressState> {
        &self.progress
    }

    pub fn manifest(&self) -> &ManifestWriter {
        &self.manifest
    }

    /// Execute `tasks` on `workers` threads and return the tallies.
    ///
    /// Returns only after every worker has exited and the manifest has been
    /// flushed. Per-file failures are recorded, never propagated.
    pub fn run(
        &self,
        tasks: Vec<CopyTask>,
        workers: usize,
        cancel: &CancelToken,
        sink: Option<&dyn ProgressSink>,
    ) -> RunSummary {
        let workers = workers.max(1);
        let capacity = (workers * self.config.queue_depth_factor).max(1);
        let (tx, rx) = bounded::<CopyTask>(capacity);
        let tally = Tally::default();
        let ctx = TransferContext {
            config: &self.config,
            small_pool: &self.small_pool,
            chunk_pool: &self.chunk_pool,
            progress: &self.progress,
            cancel,
            sink,
        };

        info!(tasks = tasks.len(), workers, "starting copy run");

        thread::scope(|s| {
            for id in 0..workers {
                let rx = rx.clone();
                let ctx = &ctx;
                let tally = &tally;
                s.spawn(move || {
                    for task in rx.iter() {
                        let status = self.process(ctx, &task);
                        tally.record(status);
                        if let Some(sink) = ctx.sink {
                            sink.on_progress(ctx.progress.snapshot());
                        }
                    }
                    debug!(worker = id, "copy worker exiting");
                });
            }
            drop(rx);

            for task in tasks {
                if cancel.is_cancelled() {
                    tally.record(self.finish(&task, None, CopyStatus::Cancelled, "interrupted"));
                    continue;
                }
                if let Err(e) = tx.send(task) {
                    // Every worker is gone; nothing will drain the queue
                    let task = e.into_inner();
                    warn!(src = %task.source.display(), "copy queue closed");
                    tally.record(self.finish(&task, None, CopyStatus::Error, "copy queue closed"));
                }
            }
            drop(tx);
        });

        self.manifest.finish();
        let summary = tally.summary();
        info!(
            copied = summary.copied,
            skipped = summary.skipped,
            errors = summary.errors,
            cancelled = summary.cancelled,
            "copy run finished"
        );
        summary
    }

    fn process(&self, ctx: &TransferContext<'_>, task: &CopyTask) -> CopyStatus {
        if ctx.cancel.is_cancelled() {
            return self.finish(task, None, CopyStatus::Cancelled, "interrupted");
        }

        if let Err(e) = fs_ops::ensure_parent_dir_exists(&task.destination) {
            warn!(dst = %task.destination.display(), "{}", e);
            return self.finish(task, None, CopyStatus::Error, e.to_string());
        }

        let source_meta = fs::metadata(&task.source).ok();
        if let Some(meta) = &source_meta {
            if fs_ops::exists_with_size(&task.destination, meta.len()) {
                debug!(dst = %task.destination.display(), "already present, skipping");
                return self.finish(task, source_meta.as_ref(), CopyStatus::Skipped, "exists-same-size");
            }
        }

        let name = fs_ops::display_name(&task.source);
        emit(ctx.sink, || match &source_meta {
            Some(meta) => format!("Start: {} ({})", name, human_size(meta.len())),
            None => format!("Start: {}", name),
        });

        match fs_ops::copy_file_atomic(ctx, &task.source, &task.destination) {
            Ok(bytes) => {
                debug!(src = %task.source.display(), bytes, "copied");
                self.finish(task, source_meta.as_ref(), CopyStatus::Copied, "ok")
            }
            Err(e) if e.is_cancelled() => {
                debug!(src = %task.source.display(), "copy cancelled mid-transfer");
                self.finish(task, source_meta.as_ref(), CopyStatus::Cancelled, "interrupted")
            }
            Err(e) => {
                warn!(src = %task.source.display(), os_error = ?e.raw_os_error(), "copy failed: {}", e);
                self.finish(task, source_meta.as_ref(), CopyStatus::Error, e.to_string())
            }
        }
    }

    fn finish(
        &self,
        task: &CopyTask,
        source_meta: Option<&fs::Metadata>,
        status: CopyStatus,
        message: impl Into<String>,
    ) -> CopyStatus {
        let (size, modified) = match source_meta {
            Some(meta) => (meta.len(), meta.modified().unwrap_or(task.modified)),
            None => (task.size, task.modified),
        };
        self.manifest
            .append(&ManifestEntry::new(task, size, modified, status, message));
        status
    }
}
