//! Importance profile loading.
//!
//! A profile is a JSON document `{"tiers": [{"name", "priority", "patterns"}]}`.
//! Tiers are returned sorted by descending priority. A missing or malformed
//! profile never blocks a run: `load_profile_or_default` falls back to the
//! built-in tiers.

use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::Tier;

/// Profile file looked up on the device root when none is given.
pub const DEFAULT_PROFILE_NAME: &str = "importance_profile.json";

#[derive(Debug, Deserialize)]
struct ProfileDocument {
    tiers: Vec<Tier>,
}

/// Built-in tiers: documents > project files > images > audio > video > archives > everything else.
pub fn default_tiers() -> Vec<Tier> {
    vec![
        Tier::new(
            "Documents",
            100,
            &[
                "*.pdf", "*.doc", "*.docx", "*.odt", "*.rtf", "*.txt", "*.md", "*.xls", "*.xlsx",
                "*.ods", "*.csv", "*.tsv", "*.ppt", "*.pptx",
            ],
        ),
        Tier::new(
            "Project Files",
            95,
            &[
                "*.tex", "*.ipynb", "*.py", "*.R", "*.m", "*.java", "*.cs", "*.cpp", "*.c", "*.ts",
                "*.js",
            ],
        ),
        Tier::new(
            "Images",
            90,
            &["*.jpg", "*.jpeg", "*.png", "*.gif", "*.tiff", "*.bmp", "*.heic", "*.webp"],
        ),
        Tier::new("Audio", 60, &["*.mp3", "*.m4a", "*.flac", "*.wav", "*.aac", "*.ogg"]),
        Tier::new("Videos", 50, &["*.mp4", "*.mov", "*.avi", "*.mkv", "*.webm"]),
        Tier::new(
            "Archives",
            40,
            &["*.zip", "*.tar", "*.gz", "*.bz2", "*.xz", "*.7z", "*.rar"],
        ),
        Tier::new("Everything else", 10, &["*"]),
    ]
}

/// Load and sort a profile.
///
/// # Errors
/// Returns `ProfileUnreadable` if the file cannot be opened and
/// `ProfileInvalid` if it does not parse.
pub fn load_profile(path: &Path) -> Result<Vec<Tier>, EngineError> {
    let file = File::open(path).map_err(|e| EngineError::ProfileUnreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let document: ProfileDocument =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| EngineError::ProfileInvalid {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut tiers = document.tiers;
    // Stable: equal priorities keep file order
    tiers.sort_by(|a, b| b.priority.cmp(&a.priority));
    Ok(tiers)
}

/// Load a profile, falling back to `default_tiers` on any failure.
pub fn load_profile_or_default(path: &Path) -> Vec<Tier> {
    match load_profile(path) {
        Ok(tiers) if !tiers.is_empty() => {
            info!(path = %path.display(), tiers = tiers.len(), "loaded importance profile");
            tiers
        }
        Ok(_) => {
            warn!(path = %path.display(), "importance profile has no tiers, using defaults");
            default_tiers()
        }
        Err(EngineError::ProfileUnreadable { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            info!(path = %path.display(), "no importance profile, using defaults");
            default_tiers()
        }
        Err(e) => {
            warn!("{}; using default tiers", e);
            default_tiers()
        }
    }
}

/// Resolve a profile path against the device root.
///
/// Absolute paths are used as given. A relative path that would climb out of
/// `device_root` is replaced by the default profile location.
pub fn resolve_profile_path(device_root: &Path, profile: &Path) -> PathBuf {
    if profile.is_absolute() {
        return profile.to_path_buf();
    }

    let mut depth: usize = 0;
    for component in profile.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => depth -= 1,
            _ => {
                warn!(
                    profile = %profile.display(),
                    "profile path escapes the device root, using {}", DEFAULT_PROFILE_NAME
                );
                return device_root.join(DEFAULT_PROFILE_NAME);
            }
        }
    }
    device_root.join(profile)
}
