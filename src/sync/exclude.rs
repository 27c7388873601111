//! Glob patterns for files neither sync flow should touch.
//!
//! Defaults cover editor swap files, office lock files and OS metadata,
//! which appear and vanish constantly inside a watched folder.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Result, SyncError};

/// Always ignored, on top of user patterns.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // OS metadata
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    // Editor swap and backup files
    "*.swp",
    "*.swo",
    "*~",
    "*.tmp",
    // Office lock files
    "~$*",
    ".~lock.*#",
];

#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExcludePatterns {
    /// Matches nothing.
    pub fn none() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_EXCLUDES {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        Self {
            glob_set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
            patterns: DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Defaults plus the given user patterns.
    pub fn with_extra<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();
        let mut all: Vec<&str> = DEFAULT_EXCLUDES.to_vec();
        all.extend(extra.iter().map(|p| p.as_ref()));

        for pattern in all {
            let glob = Glob::new(pattern).map_err(|e| invalid(pattern, e))?;
            builder.add(glob);
            patterns.push(pattern.to_string());
        }

        let glob_set = builder.build().map_err(|e| invalid("<set>", e))?;
        Ok(Self { glob_set, patterns })
    }

    /// Whether a remote-style path (`/docs/a.txt`) or bare name is excluded.
    /// Each path segment is checked on its own, so `cache` also excludes
    /// everything below a `cache` folder.
    pub fn is_excluded(&self, path: &str) -> bool {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return false;
        }
        if self.glob_set.is_match(trimmed) {
            return true;
        }
        trimmed
            .split('/')
            .any(|segment| self.glob_set.is_match(segment))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn invalid(pattern: &str, err: globset::Error) -> SyncError {
    SyncError::Config {
        path: "exclude".into(),
        detail: format!("bad pattern `{pattern}`: {err}"),
    }
}
