//! Include/exclude pattern matching for discovery.
//!
//! Patterns are globs. A file is a candidate when it matches at least one
//! include pattern and no exclude pattern.

use std::path::{Component, Path};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Include pattern used when none is configured.
pub const DEFAULT_INCLUDE: &str = "*";

#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("Invalid glob pattern '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

impl PathFilter {
    /// Compile the pattern lists. An empty include list means "everything".
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include_patterns = if include.is_empty() {
            vec![DEFAULT_INCLUDE.to_string()]
        } else {
            include.to_vec()
        };

        Ok(Self {
            include: build_set(&include_patterns)?,
            exclude: build_set(exclude)?,
            include_patterns,
            exclude_patterns: exclude.to_vec(),
        })
    }

    /// Check a root-relative path (with `/` separators).
    pub fn is_candidate(&self, relative: &str) -> bool {
        self.is_included(relative) && !self.is_excluded(relative)
    }

    fn is_included(&self, relative: &str) -> bool {
        if self.include.is_match(relative) {
            return true;
        }
        Path::new(relative)
            .file_name()
            .map(|name| self.include.is_match(name.to_string_lossy().as_ref()))
            .unwrap_or(false)
    }

    /// Excluded when the path, the file name, or any directory component
    /// matches.
    pub fn is_excluded(&self, relative: &str) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        if self.exclude.is_match(relative) {
            return true;
        }
        Path::new(relative).components().any(|component| match component {
            Component::Normal(name) => self.exclude.is_match(name.to_string_lossy().as_ref()),
            _ => false,
        })
    }

    pub fn include_patterns(&self) -> &[String] {
        &self.include_patterns
    }

    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude_patterns
    }
}
