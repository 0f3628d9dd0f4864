// ABOUTME: Fill phase: appends records from a source into a fresh log with batched durability commits.
// ABOUTME: Includes the synthetic endurance source that numbers each line and pads it with dashes.

use std::time::Duration;

use serde::Serialize;
use telespool_store::{LogError, PersistentLog};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can end a fill pass.
#[derive(Debug, Error)]
pub enum FillError {
    /// The log could not be opened; nothing was written.
    #[error("cannot open log for append: {0}")]
    Open(#[source] LogError),

    /// An append or commit failed after `appended` records were written.
    #[error("fill aborted after {appended} records: {source}")]
    Append {
        appended: u64,
        #[source]
        source: LogError,
    },
}

/// Pacing and limits for one fill pass.
#[derive(Debug, Clone)]
pub struct FillOptions {
    /// Appends between durability commits.
    pub commit_every: u64,
    /// Maximum number of records to append.
    pub quota: u64,
    /// Pause after each append. Zero still yields to the scheduler once per record.
    pub yield_between: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FillReport {
    pub appended: u64,
    pub commits: u64,
    /// Appends not covered by a cadence commit when the writer was closed.
    pub pending: u64,
    pub quota_reached: bool,
    pub cancelled: bool,
}

/// Append records from `source` to `log` until the source is exhausted, the
/// quota is reached, or `cancel` fires. Any append or commit failure aborts
/// the pass immediately; the writer is released on every exit path.
pub async fn run_fill<I>(
    log: &PersistentLog,
    source: I,
    options: &FillOptions,
    cancel: &CancellationToken,
) -> Result<FillReport, FillError>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut writer = log.open_for_append().map_err(FillError::Open)?;
    tracing::info!(
        path = %log.path().display(),
        quota = options.quota,
        commit_every = options.commit_every,
        "filling log"
    );

    let mut cancelled = false;
    let quota = usize::try_from(options.quota).unwrap_or(usize::MAX);
    for line in source.into_iter().take(quota) {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let step = writer
            .append_line(line.as_ref())
            .and_then(|_| writer.commit_if_due(options.commit_every));
        if let Err(source) = step {
            let appended = writer.appended();
            tracing::error!(appended, error = %source, "fill aborted");
            return Err(FillError::Append { appended, source });
        }

        if options.yield_between.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(options.yield_between) => {}
            }
        }
    }

    let appended = writer.appended();
    let stats = writer
        .close()
        .map_err(|source| FillError::Append { appended, source })?;

    let report = FillReport {
        appended: stats.appended,
        commits: stats.commits,
        pending: stats.pending,
        quota_reached: stats.appended == options.quota,
        cancelled,
    };
    tracing::info!(
        appended = report.appended,
        commits = report.commits,
        pending = report.pending,
        cancelled,
        "fill complete"
    );
    Ok(report)
}

/// Endless source of numbered endurance-test lines: line `n` is `n` followed
/// by a space and a run of dashes.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    next: u64,
    padding: String,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(128)
    }
}

impl SyntheticSource {
    pub fn new(dash_count: usize) -> Self {
        Self {
            next: 1,
            padding: "-".repeat(dash_count),
        }
    }
}

impl Iterator for SyntheticSource {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let line = format!("{} {}", self.next, self.padding);
        self.next += 1;
        Some(line.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn options(commit_every: u64, quota: u64) -> FillOptions {
        FillOptions {
            commit_every,
            quota,
            yield_between: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn fill_appends_source_in_order() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("log.txt"));

        let report = run_fill(
            &log,
            ["a", "b", "c"],
            &options(2, 10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.appended, 3);
        assert_eq!(report.commits, 1);
        assert_eq!(report.pending, 1);
        assert!(!report.quota_reached);

        let lines: Vec<Vec<u8>> = log.open_for_read().unwrap().map(|r| r.line).collect();
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn fill_stops_at_quota() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("log.txt"));

        let report = run_fill(
            &log,
            SyntheticSource::default(),
            &options(500, 1200),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.appended, 1200);
        assert_eq!(report.commits, 2);
        assert_eq!(report.pending, 200);
        assert!(report.quota_reached);
        assert_eq!(log.count_records().unwrap(), 1200);
    }

    #[tokio::test]
    async fn cancelled_fill_writes_nothing_more() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("log.txt"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = run_fill(&log, SyntheticSource::default(), &options(10, 100), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.appended, 0);
        assert!(log.exists());
    }

    #[tokio::test]
    async fn fill_into_missing_store_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("missing").join("log.txt"));

        let result = run_fill(&log, ["a"], &options(1, 1), &CancellationToken::new()).await;
        assert!(matches!(result, Err(FillError::Open(_))));
    }

    #[tokio::test]
    async fn zero_commit_threshold_aborts_after_first_record() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("log.txt"));

        let result = run_fill(&log, ["a", "b"], &options(0, 10), &CancellationToken::new()).await;
        match result {
            Err(FillError::Append { appended, .. }) => assert_eq!(appended, 1),
            other => panic!("expected append failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn yield_between_appends_is_observed() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("log.txt"));
        let opts = FillOptions {
            commit_every: 100,
            quota: 5,
            yield_between: Duration::from_millis(10),
        };

        let started = tokio::time::Instant::now();
        let report = run_fill(&log, SyntheticSource::default(), &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.appended, 5);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn zero_yield_fill_still_lets_other_tasks_run() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::new(dir.path().join("log.txt"));
        let ticked = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ticked);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let observer = Arc::clone(&ticked);
        let source = (0..20).map(move |i| {
            if i == 19 {
                assert!(observer.load(Ordering::SeqCst), "spawned task never ran during fill");
            }
            b"x".to_vec()
        });
        let report = run_fill(&log, source, &options(100, 20), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.appended, 20);
    }

    #[test]
    fn synthetic_source_numbers_from_one() {
        let mut source = SyntheticSource::new(4);
        assert_eq!(source.next().unwrap(), b"1 ----".to_vec());
        assert_eq!(source.next().unwrap(), b"2 ----".to_vec());
    }

    #[test]
    fn default_synthetic_line_has_128_dashes() {
        let line = SyntheticSource::default().next().unwrap();
        assert_eq!(line.len(), 2 + 128);
        assert!(line.ends_with(&[b'-'; 128]));
    }
}
