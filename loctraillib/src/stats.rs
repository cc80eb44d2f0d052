//! Core data structures: per-file state, per-day rollups and analysis results.
//!
//! The wire format is camelCase JSON:
//!
//! ```json
//! {
//!   "date": "2024-01-03",
//!   "total": 1200,
//!   "languages": { "rust": { "total": 1000, "prod": 800, "test": 200 }, "other": { "total": 200 } },
//!   "comments": ["Add parser"]
//! }
//! ```
//!
//! For every language entry carrying both `prod` and `test`, `prod + test == total`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, AddAssign};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// The only supported [`SharedCacheEntry`] version.
pub const CACHE_ENTRY_VERSION: u32 = 1;

/// The single comment of a day that had no commits and carries the previous
/// day forward. Git commit messages cannot contain NUL, so no real commit
/// collides with it.
pub const CARRY_FORWARD_COMMENT: &str = "\u{0}carried-forward";

/// Last-known classification and line count of one tracked path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub path: String,
    pub content_id: gix::ObjectId,
    pub language: Language,
    /// Counted (non-blank) lines
    pub lines: u64,
    /// Subset of `lines` that is test code
    pub test_lines: u64,
}

/// Line counts of one language on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCounts {
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prod: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<u64>,
}

impl LanguageCounts {
    /// Counts contributed by a single file.
    pub fn from_file(file: &FileState) -> Self {
        if file.language.has_test_split() {
            Self {
                total: file.lines,
                prod: Some(file.lines.saturating_sub(file.test_lines)),
                test: Some(file.test_lines),
            }
        } else {
            Self {
                total: file.lines,
                prod: None,
                test: None,
            }
        }
    }

    /// Whether `prod + test == total` holds (vacuously true without a split).
    pub fn is_consistent(&self) -> bool {
        match (self.prod, self.test) {
            (Some(prod), Some(test)) => prod.checked_add(test) == Some(self.total),
            _ => true,
        }
    }
}

fn add_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

impl Add for LanguageCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            prod: add_opt(self.prod, other.prod),
            test: add_opt(self.test, other.test),
        }
    }
}

impl AddAssign for LanguageCounts {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

/// The numeric part of a day: what the file state map aggregates to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub total: u64,
    pub languages: BTreeMap<Language, LanguageCounts>,
}

impl Snapshot {
    /// Aggregate a complete set of file states.
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a FileState>) -> Self {
        let mut snapshot = Snapshot::default();
        for file in files {
            if file.lines == 0 {
                continue;
            }
            snapshot.total += file.lines;
            *snapshot.languages.entry(file.language).or_default() +=
                LanguageCounts::from_file(file);
        }
        snapshot
    }
}

/// The line-count snapshot assigned to one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStats {
    pub date: NaiveDate,
    pub total: u64,
    pub languages: BTreeMap<Language, LanguageCounts>,
    /// Commit messages of the day in order, or the single carry-forward marker
    pub comments: Vec<String>,
}

impl DayStats {
    /// A day holding one commit's snapshot.
    pub fn from_commit(date: NaiveDate, snapshot: Snapshot, message: String) -> Self {
        Self {
            date,
            total: snapshot.total,
            languages: snapshot.languages,
            comments: vec![message],
        }
    }

    /// A copy of this day's numbers, moved to `date` and marked as carried forward.
    pub fn carried_to(&self, date: NaiveDate) -> Self {
        Self {
            date,
            total: self.total,
            languages: self.languages.clone(),
            comments: vec![CARRY_FORWARD_COMMENT.to_string()],
        }
    }

    /// Whether this day had no commits of its own.
    pub fn is_carried(&self) -> bool {
        self.comments.len() == 1 && self.comments[0] == CARRY_FORWARD_COMMENT
    }

    /// Fold a later commit of the same day in: its snapshot wins, its message is appended.
    pub fn absorb(&mut self, snapshot: Snapshot, message: String) {
        if self.is_carried() {
            self.comments.clear();
        }
        self.total = snapshot.total;
        self.languages = snapshot.languages;
        self.comments.push(message);
    }

    /// Whether two days carry the same numbers, ignoring date and comments.
    pub fn same_counts(&self, other: &DayStats) -> bool {
        self.total == other.total && self.languages == other.languages
    }
}

/// A complete per-day history of one branch, valid as of `head_commit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub repo_url: String,
    pub default_branch: String,
    pub analyzed_at: DateTime<Utc>,
    /// Full lowercase hex id of the commit this snapshot is valid as of
    pub head_commit: String,
    pub detected_languages: BTreeSet<Language>,
    pub days: Vec<DayStats>,
}

/// The persisted, content-addressed form of an [`AnalysisResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedCacheEntry {
    pub version: u32,
    pub repo_url: String,
    pub head_commit: String,
    pub result: AnalysisResult,
    pub updated_at: DateTime<Utc>,
}

impl SharedCacheEntry {
    /// Wrap a result for upload, stamped now.
    pub fn new(result: AnalysisResult) -> Self {
        Self {
            version: CACHE_ENTRY_VERSION,
            repo_url: result.repo_url.clone(),
            head_commit: result.head_commit.clone(),
            result,
            updated_at: Utc::now(),
        }
    }
}
