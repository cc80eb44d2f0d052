//! Day bucketing with calendar gap filling.
//!
//! [`DayBuckets`] lazily turns a date-ordered stream of per-commit snapshots
//! into one [`DayStats`] per calendar date, first commit day through last.
//! A date with several commits keeps the latest snapshot and all messages in
//! order; a date without commits repeats the previous day's numbers under the
//! carry-forward marker.

use std::iter::Peekable;

use chrono::NaiveDate;

use crate::stats::{DayStats, Snapshot};

/// The aggregate state right after one commit was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSnapshot {
    pub date: NaiveDate,
    pub snapshot: Snapshot,
    pub message: String,
}

/// Gap-filling iterator over days.
pub struct DayBuckets<I: Iterator<Item = CommitSnapshot>> {
    commits: Peekable<I>,
    /// A day reopened on resume, emitted before anything else
    open: Option<DayStats>,
    /// The most recently emitted day
    last: Option<DayStats>,
}

impl<I: Iterator<Item = CommitSnapshot>> DayBuckets<I> {
    pub fn new(commits: I) -> Self {
        Self {
            commits: commits.peekable(),
            open: None,
            last: None,
        }
    }

    /// Continue from a previously emitted day.
    ///
    /// The day is reopened: commits on its date fold into it, and it is
    /// emitted again (possibly updated) before any later day.
    pub fn resume(commits: I, last: DayStats) -> Self {
        Self {
            commits: commits.peekable(),
            open: Some(last),
            last: None,
        }
    }
}

impl<I: Iterator<Item = CommitSnapshot>> Iterator for DayBuckets<I> {
    type Item = DayStats;

    fn next(&mut self) -> Option<DayStats> {
        let mut day = match self.open.take() {
            Some(day) => day,
            None => {
                let date = self.commits.peek()?.date;
                if let Some(prev) = &self.last {
                    let following = prev.date.succ_opt()?;
                    if date > following {
                        let carried = prev.carried_to(following);
                        self.last = Some(carried.clone());
                        return Some(carried);
                    }
                }
                let commit = self.commits.next()?;
                DayStats::from_commit(commit.date, commit.snapshot, commit.message)
            }
        };

        // Out-of-order stragglers fold into the current day so dates stay ascending
        while let Some(commit) = self.commits.next_if(|c| c.date <= day.date) {
            day.absorb(commit.snapshot, commit.message);
        }

        self.last = Some(day.clone());
        Some(day)
    }
}
