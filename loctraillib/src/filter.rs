//! User-supplied path filtering with glob pattern support.
//!
//! Filters apply to repository-relative paths (`src/lib.rs`, `web/app.ts`)
//! before classification, so an excluded path is never fetched.

use glob::{MatchOptions, Pattern};

use crate::error::LoctrailError;
use crate::Result;

/// Configuration for path filtering.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Glob patterns to include (if empty, include everything)
    pub include: Vec<Pattern>,
    /// Glob patterns to exclude
    pub exclude: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl FilterConfig {
    /// Create a new empty filter config (matches every path).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an include pattern.
    pub fn include(mut self, pattern: &str) -> Result<Self> {
        self.include.push(compile(pattern)?);
        Ok(self)
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: &str) -> Result<Self> {
        self.exclude.push(compile(pattern)?);
        Ok(self)
    }

    /// Add multiple include patterns.
    pub fn include_many<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        for pattern in patterns {
            self = self.include(pattern.as_ref())?;
        }
        Ok(self)
    }

    /// Add multiple exclude patterns.
    pub fn exclude_many<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        for pattern in patterns {
            self = self.exclude(pattern.as_ref())?;
        }
        Ok(self)
    }

    /// Whether no pattern was configured.
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Check if a repository-relative path passes the filter.
    ///
    /// A path matches if it doesn't match any exclude pattern and matches at
    /// least one include pattern (or no include pattern is configured).
    pub fn matches(&self, path: &str) -> bool {
        if self
            .exclude
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
        {
            return false;
        }

        self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }
}

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| LoctrailError::InvalidGlob {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}
