//! Filesystem operations module.
//!
//! This module provides the low-level pieces of a single file transfer:
//! - Creating destination directories
//! - The resume check (destination already present with the same size)
//! - Crash-safe copying through a sibling temporary file and an atomic rename
//! - Three copy strategies picked by size: small, large-direct and chunked

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use filetime::FileTime;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::platform;
use crate::pool::BufferPool;
use crate::progress::{emit, eta, human_size, percent, ProgressSink, ProgressState};

/// How a file's bytes are moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// One read into a pooled small buffer, one write
    Small,
    /// A single bulk copy so the platform can use its fastest mechanism.
    /// Cancellation is only checked once the whole file has been written, so
    /// a cancel during the copy discards a complete temporary file.
    LargeDirect,
    /// Streamed through a pooled chunk buffer with cancellation checks
    Chunked,
}

impl CopyStrategy {
    pub fn for_size(size: u64, config: &EngineConfig) -> Self {
        if size <= config.small_file_threshold as u64 {
            CopyStrategy::Small
        } else if config.large_direct_enabled && size >= config.large_direct_threshold {
            CopyStrategy::LargeDirect
        } else {
            CopyStrategy::Chunked
        }
    }
}

/// The temporary file a transfer writes into.
pub(crate) trait TempOutput: Write {
    fn set_len(&self, size: u64) -> io::Result<()>;
    fn sync_data(&self) -> io::Result<()>;
}

impl TempOutput for File {
    fn set_len(&self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }

    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// Shared resources every transfer borrows.
pub(crate) struct TransferContext<'a> {
    pub config: &'a EngineConfig,
    pub small_pool: &'a BufferPool,
    pub chunk_pool: &'a BufferPool,
    pub progress: &'a ProgressState,
    pub cancel: &'a CancelToken,
    pub sink: Option<&'a dyn ProgressSink>,
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns `DirectoryCreationFailed` if the parent exists but is not a
/// directory, or cannot be created.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// True when `dst` is a regular file whose size equals `source_size`.
pub fn exists_with_size(dst: &Path, source_size: u64) -> bool {
    fs::metadata(dst)
        .map(|m| m.is_file() && m.len() == source_size)
        .unwrap_or(false)
}

/// The sibling temporary path a transfer writes before renaming.
pub fn temp_path(dst: &Path, suffix: &str) -> PathBuf {
    let mut name = dst.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy `src` to `dst` through a temporary sibling and rename it into place.
///
/// On any error the temporary file is removed and `dst` is left as it was.
/// Returns the number of bytes written.
pub(crate) fn copy_file_atomic(
    ctx: &TransferContext<'_>,
    src: &Path,
    dst: &Path,
) -> Result<u64, EngineError> {
    copy_file_atomic_with(ctx, src, dst, platform::open_sequential_write)
}

/// `copy_file_atomic` writing through whatever `open_output` returns for the
/// temporary path.
pub(crate) fn copy_file_atomic_with<W, F>(
    ctx: &TransferContext<'_>,
    src: &Path,
    dst: &Path,
    open_output: F,
) -> Result<u64, EngineError>
where
    W: TempOutput,
    F: FnOnce(&Path) -> io::Result<W>,
{
    let tmp = temp_path(dst, &ctx.config.temp_suffix);
    let _ = fs::remove_file(&tmp);

    let result = write_temp(ctx, src, &tmp, open_output).and_then(|written| {
        fs::rename(&tmp, dst).map_err(|e| EngineError::RenameFailed {
            from: tmp.clone(),
            to: dst.to_path_buf(),
            source: e,
        })?;
        Ok(written)
    });

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_temp<W, F>(
    ctx: &TransferContext<'_>,
    src: &Path,
    tmp: &Path,
    open_output: F,
) -> Result<u64, EngineError>
where
    W: TempOutput,
    F: FnOnce(&Path) -> io::Result<W>,
{
    let read_err = |e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    };
    let write_err = |e| EngineError::WriteError {
        path: tmp.to_path_buf(),
        source: e,
    };

    let mut input = platform::open_sequential_read(src).map_err(read_err)?;
    let metadata = input.metadata().map_err(read_err)?;
    let size = metadata.len();

    let mut output = open_output(tmp).map_err(write_err)?;
    // Preallocate to reduce fragmentation
    let _ = output.set_len(size);

    let name = display_name(src);
    let started = Instant::now();
    let written = match CopyStrategy::for_size(size, ctx.config) {
        CopyStrategy::Small => copy_small(ctx, &mut input, &mut output, size, src, tmp)?,
        CopyStrategy::LargeDirect => copy_direct(ctx, &mut input, &mut output, src, tmp)?,
        CopyStrategy::Chunked => copy_chunked(ctx, &mut input, &mut output, size, &name, src, tmp)?,
    };

    if written != size {
        output.set_len(written).map_err(write_err)?;
    }
    if ctx.config.sync_before_rename {
        output.sync_data().map_err(write_err)?;
    }
    drop(output);

    if let Err(e) = fs::set_permissions(tmp, metadata.permissions()) {
        debug!(path = %tmp.display(), "failed to copy permissions: {}", e);
    }
    if let Ok(modified) = metadata.modified() {
        if let Err(e) = filetime::set_file_mtime(tmp, FileTime::from_system_time(modified)) {
            debug!(path = %tmp.display(), "failed to set mtime: {}", e);
        }
    }

    let secs = started.elapsed().as_secs_f64();
    let speed = if secs > 0.0 { written as f64 / secs } else { 0.0 };
    emit(ctx.sink, || {
        format!(
            "{} done: {} in {:.2}s ({}/s)",
            name,
            human_size(written),
            secs,
            human_size(speed as u64)
        )
    });
    Ok(written)
}

fn copy_small<R: Read, W: Write>(
    ctx: &TransferContext<'_>,
    input: &mut R,
    output: &mut W,
    size: u64,
    src: &Path,
    tmp: &Path,
) -> Result<u64, EngineError> {
    if size == 0 {
        return Ok(0);
    }
    let mut buf = ctx.small_pool.checkout();
    let n = size as usize;
    if n > buf.len() {
        // Pool sized below the threshold; fall back to the chunked loop
        drop(buf);
        return copy_chunked(ctx, input, output, size, &display_name(src), src, tmp);
    }

    input.read_exact(&mut buf[..n]).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    output.write_all(&buf[..n]).map_err(|e| EngineError::WriteError {
        path: tmp.to_path_buf(),
        source: e,
    })?;
    ctx.progress.add(n as u64);
    Ok(n as u64)
}

fn copy_direct<R: Read, W: Write>(
    ctx: &TransferContext<'_>,
    input: &mut R,
    output: &mut W,
    src: &Path,
    tmp: &Path,
) -> Result<u64, EngineError> {
    // File-to-file io::copy lets std use copy_file_range/sendfile where available.
    // Cancellation is observed only after the bulk copy returns.
    let written = io::copy(input, output).map_err(|e| classify_copy_error(e, src, tmp))?;
    ctx.progress.add(written);
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(written)
}

fn copy_chunked<R: Read, W: Write>(
    ctx: &TransferContext<'_>,
    input: &mut R,
    output: &mut W,
    size: u64,
    name: &str,
    src: &Path,
    tmp: &Path,
) -> Result<u64, EngineError> {
    let mut buf = ctx.chunk_pool.checkout();
    let started = Instant::now();
    let mut last_report: Option<Instant> = None;
    let mut done: u64 = 0;

    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: src.to_path_buf(),
                    source: e,
                })
            }
        };
        output.write_all(&buf[..n]).map_err(|e| EngineError::WriteError {
            path: tmp.to_path_buf(),
            source: e,
        })?;
        done += n as u64;
        ctx.progress.add(n as u64);

        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let now = Instant::now();
        let due = last_report
            .map(|at| now.duration_since(at) >= ctx.config.file_progress_interval)
            .unwrap_or(true);
        if due {
            if let Some(sink) = ctx.sink {
                let secs = now.duration_since(started).as_secs_f64();
                let speed = if secs > 0.0 { done as f64 / secs } else { 0.0 };
                sink.on_log(format!(
                    "{} {:5.1}% | {}/s | ETA {}",
                    name,
                    percent(done, size),
                    human_size(speed as u64),
                    eta(size.saturating_sub(done), speed)
                ));
                sink.on_progress(ctx.progress.snapshot());
            }
            last_report = Some(now);
        }
    }
    Ok(done)
}

fn classify_copy_error(e: io::Error, src: &Path, tmp: &Path) -> EngineError {
    if e.kind() == io::ErrorKind::PermissionDenied || e.raw_os_error() == Some(libc::ENOSPC) {
        EngineError::WriteError {
            path: tmp.to_path_buf(),
            source: e,
        }
    } else {
        EngineError::ReadError {
            path: src.to_path_buf(),
            source: e,
        }
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Harness {
        config: EngineConfig,
        small_pool: BufferPool,
        chunk_pool: BufferPool,
        progress: ProgressState,
        cancel: CancelToken,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            Harness {
                small_pool: BufferPool::new(config.small_file_threshold, 2),
                chunk_pool: BufferPool::new(config.chunk_size, 2),
                config,
                progress: ProgressState::new(0),
                cancel: CancelToken::new(),
            }
        }

        fn ctx<'a>(&'a self, sink: Option<&'a dyn ProgressSink>) -> TransferContext<'a> {
            TransferContext {
                config: &self.config,
                small_pool: &self.small_pool,
                chunk_pool: &self.chunk_pool,
                progress: &self.progress,
                cancel: &self.cancel,
                sink,
            }
        }
    }

    fn small_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.small_file_threshold = 64;
        config.chunk_size = 16;
        config.file_progress_interval = std::time::Duration::ZERO;
        config
    }

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_log(&self, line: String) {
            self.lines.lock().expect("poisoned").push(line);
        }
    }

    #[test]
    fn test_strategy_by_size() {
        let standard = EngineConfig::default();
        assert_eq!(CopyStrategy::for_size(10, &standard), CopyStrategy::Small);
        assert_eq!(CopyStrategy::for_size(64 << 20, &standard), CopyStrategy::Chunked);

        let fast = EngineConfig::for_mode(crate::config::ThroughputMode::FastSsd);
        assert_eq!(CopyStrategy::for_size(400 << 10, &fast), CopyStrategy::Small);
        assert_eq!(CopyStrategy::for_size(8 << 20, &fast), CopyStrategy::Chunked);
        assert_eq!(CopyStrategy::for_size(16 << 20, &fast), CopyStrategy::LargeDirect);
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path(Path::new("/media/usb/docs/a.pdf"), ".part");
        assert_eq!(tmp, PathBuf::from("/media/usb/docs/a.pdf.part"));
    }

    #[test]
    fn test_exists_with_size() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("f.txt");
        assert!(!exists_with_size(&path, 0));
        fs::write(&path, "abc").expect("Failed to write");
        assert!(exists_with_size(&path, 3));
        assert!(!exists_with_size(&path, 4));
        assert!(!exists_with_size(temp_dir.path(), 0));
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("deeper").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(temp_dir.path().join("subdir").join("deeper").is_dir());
    }

    #[test]
    fn test_ensure_parent_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "x").expect("Failed to write");

        let result = ensure_parent_dir_exists(&blocker.join("file.txt"));
        assert!(matches!(result, Err(EngineError::DirectoryCreationFailed { .. })));
    }

    #[test]
    fn test_small_copy_preserves_content_and_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("note.txt");
        let dst = temp_dir.path().join("out").join("note.txt");
        fs::write(&src, b"test content").expect("Failed to write source");
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, mtime).expect("Failed to set mtime");
        ensure_parent_dir_exists(&dst).expect("Failed to create parent");

        let harness = Harness::new(small_config());
        let bytes = copy_file_atomic(&harness.ctx(None), &src, &dst).expect("Failed to copy");

        assert_eq!(bytes, 12);
        assert_eq!(fs::read(&dst).expect("Failed to read dest"), b"test content");
        let copied = FileTime::from_last_modification_time(&fs::metadata(&dst).expect("metadata"));
        assert_eq!(copied, mtime);
        assert!(!temp_path(&dst, ".part").exists());
        assert_eq!(harness.progress.transferred(), 12);
    }

    #[test]
    fn test_chunked_copy_reports_progress() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("big.bin");
        let dst = temp_dir.path().join("big-copy.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &data).expect("Failed to write source");

        let harness = Harness::new(small_config());
        let sink = RecordingSink::default();
        let bytes = copy_file_atomic(&harness.ctx(Some(&sink)), &src, &dst).expect("Failed to copy");

        assert_eq!(bytes, 1000);
        assert_eq!(fs::read(&dst).expect("Failed to read dest"), data);
        let lines = sink.lines.lock().expect("poisoned");
        assert!(lines.iter().any(|l| l.starts_with("big.bin ") && l.contains("ETA")));
        assert!(lines.last().is_some_and(|l| l.starts_with("big.bin done:")));
    }

    #[test]
    fn test_direct_copy() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("video.mkv");
        let dst = temp_dir.path().join("video-copy.mkv");
        let data = vec![42u8; 4096];
        fs::write(&src, &data).expect("Failed to write source");

        let mut config = small_config();
        config.large_direct_enabled = true;
        config.large_direct_threshold = 1024;
        let harness = Harness::new(config);
        let bytes = copy_file_atomic(&harness.ctx(None), &src, &dst).expect("Failed to copy");

        assert_eq!(bytes, 4096);
        assert_eq!(fs::read(&dst).expect("Failed to read dest"), data);
    }

    #[test]
    fn test_direct_copy_cancel_discards_finished_temp() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("video.mkv");
        let dst = temp_dir.path().join("video-copy.mkv");
        fs::write(&src, vec![42u8; 4096]).expect("Failed to write source");

        let mut config = small_config();
        config.large_direct_enabled = true;
        config.large_direct_threshold = 1024;
        let harness = Harness::new(config);
        harness.cancel.cancel();
        let result = copy_file_atomic(&harness.ctx(None), &src, &dst);

        assert!(matches!(result, Err(EngineError::Cancelled)));
        // The bulk copy ran to completion before the cancel was seen
        assert_eq!(harness.progress.transferred(), 4096);
        assert!(!dst.exists());
        assert!(!temp_path(&dst, ".part").exists());
    }

    #[test]
    fn test_cancelled_copy_leaves_no_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("big.bin");
        let dst = temp_dir.path().join("big-copy.bin");
        fs::write(&src, vec![1u8; 500]).expect("Failed to write source");

        let harness = Harness::new(small_config());
        harness.cancel.cancel();
        let result = copy_file_atomic(&harness.ctx(None), &src, &dst);

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(!dst.exists());
        assert!(!temp_path(&dst, ".part").exists());
    }

    /// Writes through to a real file until `limit` bytes, then fails with ENOSPC.
    struct FillsUp {
        file: File,
        limit: u64,
        written: std::sync::Arc<std::sync::atomic::AtomicU64>,
    }

    impl Write for FillsUp {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            use std::sync::atomic::Ordering;
            let so_far = self.written.load(Ordering::SeqCst);
            if so_far >= self.limit {
                return Err(io::Error::from_raw_os_error(libc::ENOSPC));
            }
            let take = buf.len().min((self.limit - so_far) as usize);
            let n = self.file.write(&buf[..take])?;
            self.written.fetch_add(n as u64, Ordering::SeqCst);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl TempOutput for FillsUp {
        fn set_len(&self, size: u64) -> io::Result<()> {
            self.file.set_len(size)
        }

        fn sync_data(&self) -> io::Result<()> {
            self.file.sync_data()
        }
    }

    #[test]
    fn test_disk_full_mid_transfer_removes_partial_file() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let names = ["a.bin", "victim.bin", "c.bin"];
        for name in names {
            fs::write(temp_dir.path().join(name), vec![9u8; 200]).expect("Failed to write source");
        }
        let out = temp_dir.path().join("out");
        fs::create_dir_all(&out).expect("Failed to create out");

        let harness = Harness::new(small_config());
        let reached_disk = Arc::new(AtomicU64::new(0));
        let (mut copied, mut errors) = (0, 0);
        let mut failure = None;

        for name in names {
            let src = temp_dir.path().join(name);
            let dst = out.join(name);
            let result = if name == "victim.bin" {
                let written = Arc::clone(&reached_disk);
                copy_file_atomic_with(&harness.ctx(None), &src, &dst, move |tmp| {
                    Ok(FillsUp {
                        file: File::create(tmp)?,
                        limit: 16,
                        written,
                    })
                })
            } else {
                copy_file_atomic(&harness.ctx(None), &src, &dst)
            };
            match result {
                Ok(_) => copied += 1,
                Err(e) => {
                    errors += 1;
                    failure = Some(e);
                }
            }
        }

        assert_eq!(errors, 1);
        assert_eq!(copied, 2);
        let failure = failure.expect("victim should fail");
        assert!(matches!(failure, EngineError::WriteError { .. }));
        assert_eq!(failure.raw_os_error(), Some(libc::ENOSPC));

        // One chunk reached the temporary file before the failure
        assert_eq!(reached_disk.load(Ordering::SeqCst), 16);
        assert!(!out.join("victim.bin").exists());
        assert!(!temp_path(&out.join("victim.bin"), ".part").exists());
        assert_eq!(fs::read(out.join("a.bin")).expect("Failed to read copy"), vec![9u8; 200]);
        assert_eq!(fs::read(out.join("c.bin")).expect("Failed to read copy"), vec![9u8; 200]);

        // Progress counts bytes written, including the discarded chunk
        assert_eq!(harness.progress.transferred(), 200 + 16 + 200);
    }

    #[test]
    fn test_missing_source_is_read_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let harness = Harness::new(small_config());
        let result = copy_file_atomic(
            &harness.ctx(None),
            &temp_dir.path().join("gone.txt"),
            &temp_dir.path().join("out.txt"),
        );
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
        assert!(!temp_dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_copy_replaces_stale_destination_atomically() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, "new contents").expect("Failed to write source");
        fs::write(&dst, "old").expect("Failed to write dest");
        fs::write(temp_path(&dst, ".part"), "stale partial").expect("Failed to write tmp");

        let harness = Harness::new(small_config());
        copy_file_atomic(&harness.ctx(None), &src, &dst).expect("Failed to copy");
        assert_eq!(fs::read_to_string(&dst).expect("read"), "new contents");
    }
}
