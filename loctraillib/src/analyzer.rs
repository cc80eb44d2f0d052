//! Analysis runs: walking a branch's history into per-day snapshots.
//!
//! The first commit is a full tree scan; every later commit is a lock-step
//! tree diff against its predecessor applied to the run's
//! [`IncrementalContext`]. Commits are applied strictly in order. Only blob
//! retrieval runs in parallel.
//!
//! A run can resume from a prior [`AnalysisResult`]. The prior head's state is
//! rebuilt with one scan of its tree, the prior's last day is reopened, and
//! only newer commits are walked. Whenever the prior does not line up with the
//! current history the run falls back to a cold start.

use std::collections::BTreeSet;
use std::thread;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::blobs::BlobPool;
use crate::buckets::{CommitSnapshot, DayBuckets};
use crate::config::AnalysisOptions;
use crate::diff::{diff_trees, IncrementalContext};
use crate::error::LoctrailError;
use crate::language::Language;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::repo_url::{normalize, same_repository};
use crate::source::{CommitInfo, ObjectId, ObjectSource};
use crate::stats::{AnalysisResult, DayStats};
use crate::Result;

/// How a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    /// Walk the whole history
    Cold,
    /// Rebuild state at `history[head]` and walk the commits after it
    Warm { head: usize },
    /// The prior result already covers the current head
    UpToDate,
}

/// Decide how a run may reuse `prior`, or why it may not.
pub fn plan_resume(
    history: &[CommitInfo],
    prior: Option<&AnalysisResult>,
    repo_url: Option<&str>,
) -> (ResumePlan, Option<String>) {
    let Some(prior) = prior else {
        return (ResumePlan::Cold, None);
    };
    let cold = |reason: String| (ResumePlan::Cold, Some(reason));

    if let Some(url) = repo_url {
        if !same_repository(url, &prior.repo_url) {
            return cold(format!(
                "prior result is for {}, not {}",
                prior.repo_url, url
            ));
        }
    }
    let (Some(first_day), Some(last_day)) = (prior.days.first(), prior.days.last()) else {
        return cold("prior result has no days".to_string());
    };
    let Some(head) = history
        .iter()
        .position(|c| c.id.to_string() == prior.head_commit)
    else {
        return cold(format!(
            "prior head {} is not in the current history (rewritten?)",
            prior.head_commit
        ));
    };
    if first_day.date < history[0].date {
        return cold("prior result starts before the first commit".to_string());
    }
    // Backdated commits fold into the open day, so the last day is the latest date so far
    let covered = history[..=head]
        .iter()
        .map(|c| c.date)
        .max()
        .unwrap_or(history[head].date);
    if last_day.date != covered {
        return cold(format!(
            "prior result ends on {} but its history reaches {}",
            last_day.date, covered
        ));
    }

    if head + 1 == history.len() {
        (ResumePlan::UpToDate, None)
    } else {
        (ResumePlan::Warm { head }, None)
    }
}

/// Languages with counted lines on any day.
fn detected_languages(days: &[DayStats]) -> BTreeSet<Language> {
    days.iter()
        .flat_map(|d| d.languages.keys().copied())
        .filter(|l| *l != Language::Other)
        .collect()
}

/// Run an analysis on the current thread.
///
/// Emits every non-terminal [`ProgressEvent`]; the terminal event belongs to
/// whoever owns the run (see [`spawn_analysis`]).
pub fn analyze<S: ObjectSource + ?Sized>(
    source: &S,
    options: &AnalysisOptions,
    progress: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<AnalysisResult> {
    let rev = options.rev();
    let history = source.history(rev)?;
    let Some(last) = history.last() else {
        return Err(LoctrailError::EmptyHistory);
    };
    progress.emit(ProgressEvent::History {
        commits: history.len(),
    });

    let repo_url = options
        .repo_url
        .clone()
        .or_else(|| source.remote_url())
        .map(|url| normalize(&url).unwrap_or(url))
        .unwrap_or_default();
    let default_branch = options
        .branch
        .clone()
        .or_else(|| source.default_branch())
        .unwrap_or_else(|| rev.to_string());
    let head_commit = last.id.to_string();

    let prior = options.resume_from.as_ref();
    let (plan, fallback) = plan_resume(&history, prior, options.repo_url.as_deref());
    if let Some(reason) = fallback {
        progress.warn(format!("cold start: {}", reason));
    }

    let mut ctx = IncrementalContext::new();
    let mut pool = BlobPool::new(options.fetch_concurrency, options.blob_cache_bytes)?;
    let mut days: Vec<DayStats> = Vec::new();
    let mut reopened: Option<DayStats> = None;
    let mut previous_tree: Option<ObjectId> = None;

    let pending = match (plan, prior) {
        (ResumePlan::UpToDate, Some(prior)) => {
            progress.emit(ProgressEvent::Resumed {
                from: prior.head_commit.clone(),
                pending: 0,
            });
            tracing::info!(head = %head_commit, "prior result is current");
            return Ok(AnalysisResult {
                analyzed_at: Utc::now(),
                ..prior.clone()
            });
        }
        (ResumePlan::Warm { head }, Some(prior)) => {
            let base = &history[head];
            let pending = &history[head + 1..];
            progress.emit(ProgressEvent::Resumed {
                from: prior.head_commit.clone(),
                pending: pending.len(),
            });
            tracing::info!(from = %base.id, pending = pending.len(), "resuming analysis");

            let scan = diff_trees(source, None, Some(base.tree))?;
            ctx.apply(source, &mut pool, &options.filter, &scan, cancel)?;
            previous_tree = Some(base.tree);

            days.extend_from_slice(&prior.days[..prior.days.len() - 1]);
            reopened = prior.days.last().cloned();
            pending
        }
        _ => &history[..],
    };

    let total = pending.len();
    tracing::info!(rev, commits = total, "analyzing history");

    let mut failure: Option<LoctrailError> = None;
    let snapshots = pending.iter().enumerate().map_while(|(i, commit)| {
        let mut step = || -> Result<CommitSnapshot> {
            if cancel.is_cancelled() {
                return Err(LoctrailError::Cancelled);
            }
            let changes = diff_trees(source, previous_tree, Some(commit.tree))?;
            ctx.apply(source, &mut pool, &options.filter, &changes, cancel)?;
            previous_tree = Some(commit.tree);
            tracing::debug!(commit = %commit.id, date = %commit.date, changes = changes.len(), "applied commit");
            Ok(CommitSnapshot {
                date: commit.date,
                snapshot: ctx.snapshot(),
                message: commit.message.clone(),
            })
        };
        match step() {
            Ok(snapshot) => {
                progress.emit(ProgressEvent::Processing { done: i + 1, total });
                Some(snapshot)
            }
            Err(e) => {
                failure = Some(e);
                None
            }
        }
    });

    let buckets = match reopened {
        Some(day) => DayBuckets::resume(snapshots, day),
        None => DayBuckets::new(snapshots),
    };
    for day in buckets {
        progress.emit(ProgressEvent::Day(day.clone()));
        days.push(day);
    }
    if let Some(e) = failure {
        return Err(e);
    }

    let stats = pool.stats();
    tracing::info!(
        days = days.len(),
        files = ctx.len(),
        blobs_fetched = stats.fetched,
        cache_hits = stats.cache_hits,
        "analysis complete"
    );

    Ok(AnalysisResult {
        repo_url,
        default_branch,
        analyzed_at: Utc::now(),
        head_commit,
        detected_languages: detected_languages(&days),
        days,
    })
}

/// A run executing on its own worker thread.
pub struct AnalysisHandle {
    /// Progress stream, ending with exactly one terminal event
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    cancel: CancellationToken,
    worker: thread::JoinHandle<Result<AnalysisResult>>,
}

impl AnalysisHandle {
    /// Ask the run to stop; no further commit is processed once observed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Block until the run ends.
    pub fn join(self) -> Result<AnalysisResult> {
        self.worker
            .join()
            .map_err(|_| LoctrailError::Worker("analysis thread panicked".to_string()))?
    }
}

/// Start a run on a dedicated worker thread.
pub fn spawn_analysis<S>(source: S, options: AnalysisOptions) -> Result<AnalysisHandle>
where
    S: ObjectSource + 'static,
{
    let (sink, events) = ProgressSink::channel();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let worker = thread::Builder::new()
        .name("loctrail-analysis".to_string())
        .spawn(move || {
            let outcome = analyze(&source, &options, &sink, &token);
            match &outcome {
                Ok(result) => sink.emit(ProgressEvent::Completed(Box::new(result.clone()))),
                Err(e) => sink.emit(ProgressEvent::Failed(e.to_string())),
            }
            outcome
        })?;

    Ok(AnalysisHandle {
        events,
        cancel,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::source::testing::MemorySource;
    use crate::stats::CARRY_FORWARD_COMMENT;

    const LIB_V1: &str = "pub fn a() -> u8 {\n    1\n}\n";
    const LIB_V2: &str = "pub fn a() -> u8 {\n    1\n}\n\n#[cfg(test)]\nmod tests {\n    #[test]\n    fn t() {}\n}\n";

    fn repo() -> MemorySource {
        let mut source = MemorySource::new();
        source.commit("2024-01-01", "init", &[("src/lib.rs", LIB_V1), ("README.md", "# r\n")]);
        source.commit(
            "2024-01-03",
            "add tests",
            &[("src/lib.rs", LIB_V2), ("README.md", "# r\n")],
        );
        source.commit(
            "2024-01-03",
            "add web",
            &[
                ("src/lib.rs", LIB_V2),
                ("README.md", "# r\n"),
                ("web/app.ts", "export const a = 1;\n"),
                ("web/app.test.ts", "test('a', () => {});\n"),
            ],
        );
        source.commit(
            "2024-01-06",
            "drop readme",
            &[
                ("src/lib.rs", LIB_V2),
                ("web/app.ts", "export const a = 1;\n"),
                ("web/app.test.ts", "test('a', () => {});\n"),
            ],
        );
        source
    }

    fn options() -> AnalysisOptions {
        AnalysisOptions::new().repo_url("https://github.com/o/r")
    }

    fn run(source: &MemorySource, options: &AnalysisOptions) -> Result<AnalysisResult> {
        analyze(source, options, &ProgressSink::disabled(), &CancellationToken::new())
    }

    #[test]
    fn test_cold_analysis() {
        let result = run(&repo(), &options()).unwrap();

        let dates: Vec<String> = result.days.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(
            dates,
            vec!["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05", "2024-01-06"]
        );
        assert_eq!(result.days[1].comments, vec![CARRY_FORWARD_COMMENT]);
        assert_eq!(result.days[2].comments, vec!["add tests", "add web"]);

        let day3 = &result.days[2];
        let rust = day3.languages[&Language::Rust];
        assert_eq!((rust.total, rust.prod, rust.test), (8, Some(3), Some(5)));
        let ts = day3.languages[&Language::TypeScript];
        assert_eq!((ts.total, ts.prod, ts.test), (2, Some(1), Some(1)));
        assert_eq!(day3.languages[&Language::Other].total, 1);
        assert_eq!(day3.total, 11);

        let last = result.days.last().unwrap();
        assert_eq!(last.total, 10);
        assert!(!last.languages.contains_key(&Language::Other));

        assert_eq!(result.repo_url, "https://github.com/o/r");
        assert_eq!(result.default_branch, "main");
        assert_eq!(
            result.detected_languages,
            [Language::Rust, Language::TypeScript].into_iter().collect()
        );
        assert!(result
            .days
            .iter()
            .all(|d| d.languages.values().all(|c| c.is_consistent())));
    }

    /// Options walking history only up to the `n`th commit.
    fn upto(source: &MemorySource, n: usize) -> AnalysisOptions {
        options().branch(source.commits()[n - 1].id.to_string())
    }

    #[test]
    fn test_resume_matches_cold_run() {
        let full = repo();
        let cold = run(&full, &options()).unwrap();

        for n in 1..full.commits().len() {
            let prior = run(&full, &upto(&full, n)).unwrap();
            assert_eq!(prior.head_commit, full.commits()[n - 1].id.to_string());

            let resumed = run(&full, &options().resume_from(prior)).unwrap();
            assert_eq!(resumed.days, cold.days, "resuming after {} commits", n);
            assert_eq!(resumed.head_commit, cold.head_commit);
            assert_eq!(resumed.detected_languages, cold.detected_languages);
        }
    }

    #[test]
    fn test_resume_walks_only_new_commits() {
        let full = repo();
        let prior = run(&full, &upto(&full, 3)).unwrap();

        let (sink, mut events) = ProgressSink::channel();
        analyze(
            &full,
            &options().resume_from(prior),
            &sink,
            &CancellationToken::new(),
        )
        .unwrap();
        drop(sink);

        let mut processing = Vec::new();
        let mut resumed = None;
        while let Ok(event) = events.try_recv() {
            match event {
                ProgressEvent::Processing { done, total } => processing.push((done, total)),
                ProgressEvent::Resumed { pending, .. } => resumed = Some(pending),
                ProgressEvent::Warning(w) => panic!("unexpected warning: {}", w),
                _ => {}
            }
        }
        assert_eq!(resumed, Some(1));
        assert_eq!(processing, vec![(1, 1)]);
    }

    #[test]
    fn test_up_to_date_prior_is_reused() {
        let full = repo();
        let prior = run(&full, &options()).unwrap();
        full.reset_reads();

        let again = run(&full, &options().resume_from(prior.clone())).unwrap();
        assert_eq!(again.days, prior.days);
        assert!(full.blob_reads.lock().is_empty());
    }

    #[test]
    fn test_unrelated_prior_falls_back_to_cold() {
        let full = repo();
        let cold = run(&full, &options()).unwrap();

        let mut rewritten = cold.clone();
        rewritten.head_commit = "f".repeat(40);
        let (sink, mut events) = ProgressSink::channel();
        let result = analyze(
            &full,
            &options().resume_from(rewritten),
            &sink,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(result.days, cold.days);

        let mut warned = false;
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::Warning(w) = event {
                warned |= w.contains("not in the current history");
            }
        }
        assert!(warned);
    }

    #[test]
    fn test_plan_resume_rules() {
        let full = repo();
        let history = full.history("HEAD").unwrap();
        let prior = run(&full, &upto(&full, 2)).unwrap();

        assert_eq!(plan_resume(&history, None, None).0, ResumePlan::Cold);
        assert_eq!(
            plan_resume(&history, Some(&prior), None).0,
            ResumePlan::Warm { head: 1 }
        );

        let (plan, reason) = plan_resume(&history, Some(&prior), Some("https://github.com/o/other"));
        assert_eq!(plan, ResumePlan::Cold);
        assert!(reason.unwrap().contains("prior result is for"));

        let mut empty = prior.clone();
        empty.days.clear();
        assert_eq!(plan_resume(&history, Some(&empty), None).0, ResumePlan::Cold);

        let mut short = prior.clone();
        short.days.pop();
        assert_eq!(plan_resume(&history, Some(&short), None).0, ResumePlan::Cold);
    }

    #[test]
    fn test_prior_starting_before_first_commit_falls_back_to_cold() {
        let full = repo();
        let history = full.history("HEAD").unwrap();
        let mut prior = run(&full, &upto(&full, 2)).unwrap();
        let mut earlier = prior.days[0].clone();
        earlier.date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        prior.days.insert(0, earlier);

        let (plan, reason) = plan_resume(&history, Some(&prior), None);
        assert_eq!(plan, ResumePlan::Cold);
        assert!(reason.unwrap().contains("starts before the first commit"));

        let cold = run(&full, &options()).unwrap();
        let (sink, mut events) = ProgressSink::channel();
        let result = analyze(
            &full,
            &options().resume_from(prior),
            &sink,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(result.days, cold.days);

        let mut warned = false;
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::Warning(w) = event {
                warned |= w.contains("cold start") && w.contains("starts before the first commit");
            }
        }
        assert!(warned);
    }

    /// A tip authored before its parent, as left behind by rebase or cherry-pick.
    fn backdated_repo() -> MemorySource {
        let mut source = MemorySource::new();
        source.commit("2024-01-01", "a", &[("a.rs", "fn a() {}\n")]);
        source.commit("2024-01-05", "b", &[("a.rs", "fn a() {}\n"), ("b.rs", "fn b() {}\n")]);
        source.commit(
            "2024-01-03",
            "c",
            &[
                ("a.rs", "fn a() {}\n"),
                ("b.rs", "fn b() {}\n"),
                ("c.rs", "fn c() {}\n"),
            ],
        );
        source
    }

    #[test]
    fn test_backdated_tip_is_head_and_folds_into_open_day() {
        let source = backdated_repo();
        let result = run(&source, &options()).unwrap();

        assert_eq!(result.head_commit, source.commits()[2].id.to_string());
        let dates: Vec<String> = result.days.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(
            dates,
            ["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"]
        );
        let last = result.days.last().unwrap();
        assert_eq!(last.comments, ["b", "c"]);
        assert_eq!(last.total, 3, "the tip's file is counted");
    }

    #[test]
    fn test_resume_across_backdated_tip() {
        let source = backdated_repo();
        let cold = run(&source, &options()).unwrap();

        let prior = run(&source, &upto(&source, 2)).unwrap();
        let history = source.history("HEAD").unwrap();
        assert_eq!(
            plan_resume(&history, Some(&prior), None).0,
            ResumePlan::Warm { head: 1 }
        );
        let resumed = run(&source, &options().resume_from(prior)).unwrap();
        assert_eq!(resumed.days, cold.days);
        assert_eq!(resumed.head_commit, cold.head_commit);

        // A result that already saw the backdated tip is current
        assert_eq!(
            plan_resume(&history, Some(&cold), None).0,
            ResumePlan::UpToDate
        );
    }

    #[test]
    fn test_empty_history() {
        let result = run(&MemorySource::new(), &options());
        assert!(matches!(result, Err(LoctrailError::EmptyHistory)));
    }

    #[test]
    fn test_cancelled_run_processes_nothing() {
        let source = repo();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = analyze(&source, &options(), &ProgressSink::disabled(), &cancel);
        assert!(matches!(result, Err(LoctrailError::Cancelled)));
        assert!(source.blob_reads.lock().is_empty());
    }

    #[test]
    fn test_spawned_run_streams_events() {
        let handle = spawn_analysis(Arc::new(repo()), options()).unwrap();
        let mut events = Vec::new();
        let mut rx = handle.events;
        while let Some(event) = rx.blocking_recv() {
            events.push(event);
        }
        let result = handle.worker.join().unwrap().unwrap();

        assert_eq!(events.first(), Some(&ProgressEvent::History { commits: 4 }));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        match events.last() {
            Some(ProgressEvent::Completed(done)) => assert_eq!(**done, result),
            other => panic!("expected completion, got {:?}", other),
        }
        let days: Vec<&DayStats> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Day(day) => Some(day),
                _ => None,
            })
            .collect();
        assert_eq!(days.len(), result.days.len());
    }

    #[test]
    fn test_spawned_run_reports_failure() {
        let handle = spawn_analysis(MemorySource::new(), options()).unwrap();
        handle.cancel();
        let mut rx = handle.events;
        let mut last = None;
        while let Some(event) = rx.blocking_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(ProgressEvent::Failed(_))));
        assert!(handle.worker.join().unwrap().is_err());
    }
}
