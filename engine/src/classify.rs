//! Path classification and exclusion matching.
//!
//! `Classifier` maps a path to the priority of the first tier (in descending
//! priority order) with a matching pattern. `ExcludeSet` answers whether a
//! path is excluded by a user or default glob. Both compare lowercase text
//! only, so matching is case-insensitive.
//!
//! globset's `*` crosses `/`, so during a scan excludes see the path relative
//! to the scanned root with a leading `/`. A root that itself sits under a
//! `tmp` directory is scanned normally while `tmp` directories inside it are
//! still pruned.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::error::EngineError;
use crate::model::Tier;
use crate::profile::default_tiers;

#[derive(Debug, Clone)]
struct CompiledTier {
    priority: i32,
    patterns: GlobSet,
}

/// Assigns importance priorities from an already-sorted tier list.
#[derive(Debug, Clone)]
pub struct Classifier {
    tiers: Vec<CompiledTier>,
}

impl Classifier {
    /// Compile a descending-sorted tier list. An empty list means the built-in tiers.
    ///
    /// Patterns that fail to compile are dropped with a warning; they would
    /// never match anyway.
    pub fn new(tiers: &[Tier]) -> Self {
        let defaults;
        let tiers = if tiers.is_empty() {
            defaults = default_tiers();
            &defaults[..]
        } else {
            tiers
        };

        let compiled = tiers
            .iter()
            .map(|tier| {
                let mut builder = GlobSetBuilder::new();
                for pattern in &tier.patterns {
                    match Glob::new(&pattern.to_lowercase()) {
                        Ok(glob) => {
                            builder.add(glob);
                        }
                        Err(e) => warn!(tier = %tier.name, pattern = %pattern, "skipping invalid pattern: {}", e),
                    }
                }
                let patterns = builder.build().unwrap_or_else(|e| {
                    warn!(tier = %tier.name, "dropping tier, patterns failed to build: {}", e);
                    GlobSet::empty()
                });
                CompiledTier {
                    priority: tier.priority,
                    patterns,
                }
            })
            .collect();

        Classifier { tiers: compiled }
    }

    /// Priority of the first tier matching the lowercase file name or the
    /// lowercase full path; 0 when nothing matches.
    pub fn priority_of(&self, path: &Path) -> i32 {
        let full = path.to_string_lossy().to_lowercase();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.tiers
            .iter()
            .find(|tier| tier.patterns.is_match(&name) || tier.patterns.is_match(&full))
            .map(|tier| tier.priority)
            .unwrap_or(0)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Case-insensitive exclude globs.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl ExcludeSet {
    /// An exclude set that matches nothing.
    pub fn empty() -> Self {
        ExcludeSet {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Compile patterns.
    ///
    /// # Errors
    /// Returns `InvalidPattern` for the first pattern that fails to compile.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, EngineError> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let lowered = pattern.as_ref().to_lowercase();
            let glob = Glob::new(&lowered).map_err(|e| EngineError::InvalidPattern {
                pattern: pattern.as_ref().to_string(),
                source: e,
            })?;
            builder.add(glob);
            pattern_list.push(lowered);
        }

        let glob_set = builder.build().map_err(|e| EngineError::InvalidPattern {
            pattern: pattern_list.join(","),
            source: e,
        })?;
        Ok(ExcludeSet {
            glob_set,
            patterns: pattern_list,
        })
    }

    /// Match the path text as given.
    pub fn is_excluded(&self, path: &Path) -> bool {
        !self.patterns.is_empty() && self.glob_set.is_match(path.to_string_lossy().to_lowercase())
    }

    /// Match `path` as seen from `root`: `/<relative path>`. Paths outside
    /// `root` fall back to the full path.
    pub fn is_excluded_within(&self, root: &Path, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        match path.strip_prefix(root) {
            Ok(rel) => {
                let text = format!("/{}", rel.to_string_lossy().to_lowercase());
                self.glob_set.is_match(text)
            }
            Err(_) => self.is_excluded(path),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::empty()
    }
}
