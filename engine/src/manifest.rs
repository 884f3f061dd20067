//! Append-only JSON-lines manifest of copy outcomes.
//!
//! One line per completed task. Appends are serialized through a single
//! mutex and flushed before the lock is released, so every line on disk is a
//! complete JSON object regardless of worker interleaving. Manifest I/O
//! failures are logged and otherwise ignored; auditing degrades, the run
//! does not stop.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::EngineError;
use crate::model::ManifestEntry;

/// Serialized writer for `backup-manifest.jsonl`.
#[derive(Debug)]
pub struct ManifestWriter {
    path: Option<PathBuf>,
    out: Option<Mutex<BufWriter<File>>>,
}

impl ManifestWriter {
    /// Open (create or append to) the manifest at `path`.
    ///
    /// # Errors
    /// Returns `WriteError` if the file cannot be opened for appending.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(ManifestWriter {
            path: Some(path.to_path_buf()),
            out: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    /// Open the manifest, or fall back to a disabled writer with a warning.
    pub fn open_or_disabled(path: &Path) -> Self {
        Self::open(path).unwrap_or_else(|e| {
            warn!("manifest disabled: {}", e);
            Self::disabled()
        })
    }

    /// A writer that discards every entry.
    pub fn disabled() -> Self {
        ManifestWriter {
            path: None,
            out: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry as a single line and flush it.
    pub fn append(&self, entry: &ManifestEntry) {
        let Some(out) = &self.out else {
            return;
        };

        let mut line = match serde_json::to_vec(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(src = %entry.src.display(), "failed to encode manifest entry: {}", e);
                return;
            }
        };
        line.push(b'\n');

        let mut writer = match out.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writer.write_all(&line).and_then(|_| writer.flush()) {
            warn!(src = %entry.src.display(), "failed to write manifest entry: {}", e);
        }
    }

    /// Flush any buffered bytes. Called once after the workers drain.
    pub fn finish(&self) {
        if let Some(out) = &self.out {
            let mut writer = match out.lock() {
                Ok(writer) => writer,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Err(e) = writer.flush() {
                warn!("failed to flush manifest: {}", e);
            }
        }
    }
}
