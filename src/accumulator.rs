//! Aggregation of test lifecycle events into per-case outcomes.
//!
//! The [`ResultAccumulator`] owns one [`ExecutionState`] for the lifetime of
//! a reporter and folds every lifecycle event into it. Retries of a test
//! share its case ids, so the state collapses them:
//!
//! | Sequence for one case | Final lists |
//! |-----------------------|-------------|
//! | fail, pass | passed |
//! | fail, fail | failed (once), error and screenshot of the last failure |
//! | fail, pass, fail | passed, error of the last failure |
//! | pass, fail | failed |
//!
//! A case therefore never ends up in both `passed` and `failed`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::capture::ScreenshotCapture;
use crate::case_id::{CaseId, CaseIdExtractor};
use crate::event::{AggregatedResult, ErrorDetail, TestInfo, TestOutcome};

/// Elapsed time of a test in whole seconds, never less than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(u64);

impl Elapsed {
    pub fn from_duration(duration: Duration) -> Self {
        let secs = duration.as_secs_f64().round() as u64;
        Self(secs.max(1))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.max(1))
    }

    pub fn secs(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl Serialize for Elapsed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One occurrence of a case in the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutcome {
    pub case_id: CaseId,
    pub outcome: TestOutcome,
    pub elapsed: Elapsed,
}

/// Everything recorded during one execution, consumed once at flush.
#[derive(Debug, Default)]
pub struct ExecutionState {
    pub passed: Vec<CaseOutcome>,
    pub failed: Vec<CaseOutcome>,
    pub skipped: Vec<CaseOutcome>,
    /// Error of the most recent failure per case.
    pub errors_by_case: HashMap<CaseId, ErrorDetail>,
    /// Screenshot file of the most recent failure per case.
    pub attachments_by_case: HashMap<CaseId, String>,
    /// Every case that failed at least once. Never shrinks.
    pub failed_case_ids: HashSet<CaseId>,
    started: HashMap<String, Instant>,
}

impl ExecutionState {
    pub fn record_start(&mut self, key: &str, at: Instant) {
        self.started.insert(key.to_string(), at);
    }

    /// Elapsed time of a finished test; the recorded start wins over the
    /// framework-supplied duration.
    pub fn finish(&mut self, test: &TestInfo, at: Instant) -> Elapsed {
        match self.started.remove(test.key()) {
            Some(start) => Elapsed::from_duration(at.saturating_duration_since(start)),
            None => Elapsed::from_duration(test.duration.unwrap_or_default()),
        }
    }

    pub fn record_passed(&mut self, ids: &[CaseId], elapsed: Elapsed) {
        for id in ids {
            if self.failed_case_ids.contains(id) {
                self.failed.retain(|o| &o.case_id != id);
            }
            self.passed.push(CaseOutcome {
                case_id: id.clone(),
                outcome: TestOutcome::Passed,
                elapsed,
            });
        }
    }

    /// Records a failure of `ids`. The screenshot is attached separately
    /// with [`record_screenshot`](Self::record_screenshot).
    pub fn record_failed(&mut self, ids: &[CaseId], elapsed: Elapsed, error: &ErrorDetail) {
        for id in ids {
            if self.failed_case_ids.insert(id.clone()) {
                self.passed.retain(|o| &o.case_id != id);
                self.failed.push(CaseOutcome {
                    case_id: id.clone(),
                    outcome: TestOutcome::Failed,
                    elapsed,
                });
            } else {
                debug!("Case {} already failed in this run, refreshing its error", id);
            }

            self.errors_by_case.insert(id.clone(), error.clone());
        }
    }

    /// Attaches the screenshot of the latest failure to those of `ids` that
    /// are still failed. `None` clears a screenshot left by an earlier
    /// failure.
    pub fn record_screenshot(&mut self, ids: &[CaseId], screenshot: Option<&str>) {
        for id in ids {
            if !self.failed.iter().any(|o| &o.case_id == id) {
                continue;
            }
            match screenshot {
                Some(file) => {
                    self.attachments_by_case.insert(id.clone(), file.to_string());
                }
                None => {
                    self.attachments_by_case.remove(id);
                }
            }
        }
    }

    pub fn record_skipped(&mut self, ids: &[CaseId], elapsed: Elapsed) {
        for id in ids {
            if self.failed_case_ids.contains(id) {
                continue;
            }
            self.skipped.push(CaseOutcome {
                case_id: id.clone(),
                outcome: TestOutcome::Skipped,
                elapsed,
            });
        }
    }

    /// Distinct case ids over passed, failed and skipped, in that order.
    pub fn case_ids(&self) -> Vec<CaseId> {
        let mut seen = HashSet::new();
        self.passed
            .iter()
            .chain(&self.failed)
            .chain(&self.skipped)
            .filter(|o| seen.insert(o.case_id.clone()))
            .map(|o| o.case_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passed.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Folds lifecycle events into an [`ExecutionState`].
///
/// Handlers may run concurrently. The state lock is never held across an
/// await: a failure updates the lists and the error map in one critical
/// section, then takes a single screenshot for the test and attaches it to
/// the cases that are still failed.
pub struct ResultAccumulator {
    extractor: CaseIdExtractor,
    capture: Option<Arc<dyn ScreenshotCapture>>,
    state: Mutex<ExecutionState>,
}

impl ResultAccumulator {
    pub fn new(extractor: CaseIdExtractor) -> Self {
        Self {
            extractor,
            capture: None,
            state: Mutex::new(ExecutionState::default()),
        }
    }

    /// Takes a screenshot for every failed case.
    pub fn with_capture(mut self, capture: Arc<dyn ScreenshotCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn extractor(&self) -> &CaseIdExtractor {
        &self.extractor
    }

    pub fn capture(&self) -> Option<&Arc<dyn ScreenshotCapture>> {
        self.capture.as_ref()
    }

    fn state(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn case_ids(&self, test: &TestInfo) -> Vec<CaseId> {
        self.extractor.extract_for_test(&test.title, &test.tags)
    }

    pub fn test_started(&self, test: &TestInfo) {
        self.state().record_start(test.key(), Instant::now());
    }

    pub fn test_passed(&self, test: &TestInfo) {
        let ids = self.case_ids(test);
        let mut state = self.state();
        let elapsed = state.finish(test, Instant::now());
        state.record_passed(&ids, elapsed);
    }

    pub async fn test_failed(&self, test: &TestInfo, error: &ErrorDetail) {
        let ids = self.case_ids(test);
        {
            let mut state = self.state();
            let elapsed = state.finish(test, Instant::now());
            state.record_failed(&ids, elapsed, error);
        }
        if ids.is_empty() {
            return;
        }

        let screenshot = self.take_screenshot(&ids).await;
        self.state().record_screenshot(&ids, screenshot.as_deref());
    }

    pub fn test_skipped(&self, test: &TestInfo) {
        let ids = self.case_ids(test);
        let mut state = self.state();
        let elapsed = state.finish(test, Instant::now());
        state.record_skipped(&ids, elapsed);
    }

    /// Folds the batch reported by parallel workers, using the durations they
    /// measured and the screenshots they already wrote.
    pub fn ingest_workers(&self, result: &AggregatedResult) {
        let mut state = self.state();
        for record in &result.tests {
            let ids = self.case_ids(&record.test);
            let elapsed = Elapsed::from_duration(record.test.duration.unwrap_or_default());
            match record.outcome {
                TestOutcome::Passed => state.record_passed(&ids, elapsed),
                TestOutcome::Skipped => state.record_skipped(&ids, elapsed),
                TestOutcome::Failed => {
                    let error = record
                        .error
                        .clone()
                        .unwrap_or_else(|| ErrorDetail::message("Test failed"));
                    state.record_failed(&ids, elapsed, &error);
                    state.record_screenshot(&ids, record.screenshot.as_deref());
                }
            }
        }
    }

    /// Hands over the accumulated state, leaving an empty one behind.
    pub fn take_state(&self) -> ExecutionState {
        std::mem::take(&mut *self.state())
    }

    /// Runs `f` against the current state.
    pub fn inspect<R>(&self, f: impl FnOnce(&ExecutionState) -> R) -> R {
        f(&self.state())
    }

    /// One screenshot per failed test, shared by all of its case ids.
    async fn take_screenshot(&self, ids: &[CaseId]) -> Option<String> {
        let capture = self.capture.as_ref()?;
        let file_name = format!("{}_failed.png", chrono::Utc::now().timestamp());
        match capture.save_screenshot(&file_name).await {
            Ok(()) => Some(file_name),
            Err(e) => {
                let ids: Vec<&str> = ids.iter().map(CaseId::as_str).collect();
                warn!("Cannot take screenshot for cases {}: {}", ids.join(", "), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::capture::{CaptureError, CaptureResult};

    struct CountingCapture {
        dir: PathBuf,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ScreenshotCapture for CountingCapture {
        fn output_dir(&self) -> &Path {
            &self.dir
        }

        async fn save_screenshot(&self, _file_name: &str) -> CaptureResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CaptureError::Spawn("no display".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn accumulator() -> ResultAccumulator {
        ResultAccumulator::new(CaseIdExtractor::new("@C").unwrap())
    }

    fn tagged(tag: &str) -> TestInfo {
        TestInfo::new(format!("scenario {}", tag)).with_tag(tag)
    }

    fn ids(outcomes: &[CaseOutcome]) -> Vec<&str> {
        outcomes.iter().map(|o| o.case_id.as_str()).collect()
    }

    #[test]
    fn test_elapsed_rendering() {
        assert_eq!(Elapsed::from_duration(Duration::ZERO).to_string(), "1s");
        assert_eq!(Elapsed::from_duration(Duration::from_millis(300)).to_string(), "1s");
        assert_eq!(Elapsed::from_duration(Duration::from_secs(7)).to_string(), "7s");
        assert_eq!(Elapsed::from_secs(0).secs(), 1);
        assert_eq!(
            serde_json::to_string(&Elapsed::from_secs(12)).unwrap(),
            r#""12s""#
        );
    }

    #[tokio::test]
    async fn test_fail_then_pass_keeps_only_pass() {
        let acc = accumulator();
        let test = tagged("@C1");

        acc.test_started(&test);
        acc.test_failed(&test, &ErrorDetail::message("first")).await;
        acc.test_started(&test);
        acc.test_passed(&test);

        let state = acc.take_state();
        assert_eq!(ids(&state.passed), vec!["1"]);
        assert!(state.failed.is_empty());
        assert!(state.failed_case_ids.contains(&CaseId::new("1")));
    }

    #[tokio::test]
    async fn test_fail_twice_keeps_one_entry_with_last_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let capture = Arc::new(CountingCapture {
            dir: dir.path().to_path_buf(),
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let acc = accumulator().with_capture(capture.clone());
        let test = tagged("@C2");

        acc.test_started(&test);
        acc.test_failed(&test, &ErrorDetail::message("first")).await;
        acc.test_started(&test);
        acc.test_failed(&test, &ErrorDetail::message("second")).await;

        let state = acc.take_state();
        assert_eq!(ids(&state.failed), vec!["2"]);
        assert_eq!(
            state.errors_by_case[&CaseId::new("2")].to_comment_text(),
            "second"
        );
        assert!(state.attachments_by_case[&CaseId::new("2")].ends_with("_failed.png"));
        assert_eq!(capture.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_second_failure_overwrites_attachment() {
        let mut state = ExecutionState::default();
        let id = CaseId::new("2");
        let elapsed = Elapsed::from_secs(1);

        let ids = std::slice::from_ref(&id);

        state.record_failed(ids, elapsed, &ErrorDetail::message("first"));
        state.record_screenshot(ids, Some("100_failed.png"));
        state.record_failed(ids, elapsed, &ErrorDetail::message("second"));
        state.record_screenshot(ids, Some("105_failed.png"));

        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.attachments_by_case[&id], "105_failed.png");
        assert_eq!(state.errors_by_case[&id].to_comment_text(), "second");
    }

    #[test]
    fn test_fail_pass_fail_keeps_pass_and_refreshes_error() {
        let mut state = ExecutionState::default();
        let id = CaseId::new("3");
        let case = std::slice::from_ref(&id);
        let elapsed = Elapsed::from_secs(1);

        state.record_failed(case, elapsed, &"one".into());
        state.record_screenshot(case, Some("a.png"));
        state.record_passed(case, elapsed);
        state.record_failed(case, elapsed, &"two".into());
        state.record_screenshot(case, Some("b.png"));

        assert_eq!(ids(&state.passed), vec!["3"]);
        assert!(state.failed.is_empty());
        // a recovered case keeps no fresh screenshot
        assert_eq!(state.attachments_by_case[&id], "a.png");
        assert_eq!(state.errors_by_case[&id].to_comment_text(), "two");
    }

    #[test]
    fn test_pass_then_fail_keeps_only_failure() {
        let mut state = ExecutionState::default();
        let id = CaseId::new("4");
        let elapsed = Elapsed::from_secs(1);

        state.record_passed(std::slice::from_ref(&id), elapsed);
        state.record_failed(std::slice::from_ref(&id), elapsed, &"broken".into());

        assert!(state.passed.is_empty());
        assert_eq!(ids(&state.failed), vec!["4"]);
    }

    #[test]
    fn test_duplicate_passes_are_kept() {
        let acc = accumulator();
        let test = tagged("@C5");
        acc.test_passed(&test);
        acc.test_passed(&test);

        acc.inspect(|state| assert_eq!(ids(&state.passed), vec!["5", "5"]));
    }

    #[tokio::test]
    async fn test_skip_after_failure_is_ignored() {
        let acc = accumulator();
        acc.test_skipped(&tagged("@C6"));
        acc.test_failed(&tagged("@C7"), &"boom".into()).await;
        acc.test_skipped(&tagged("@C7"));

        acc.inspect(|state| {
            assert_eq!(ids(&state.skipped), vec!["6"]);
            assert_eq!(ids(&state.failed), vec!["7"]);
        });
    }

    #[tokio::test]
    async fn test_capture_failure_does_not_abort_recording() {
        let dir = tempfile::TempDir::new().unwrap();
        let acc = accumulator().with_capture(Arc::new(CountingCapture {
            dir: dir.path().to_path_buf(),
            calls: AtomicUsize::new(0),
            fail: true,
        }));

        acc.test_failed(&tagged("@C8"), &"boom".into()).await;

        let state = acc.take_state();
        assert_eq!(ids(&state.failed), vec!["8"]);
        assert!(state.attachments_by_case.is_empty());
    }

    #[test]
    fn test_untagged_tests_are_not_attributed() {
        let acc = accumulator();
        acc.test_passed(&TestInfo::new("no tags here").with_tag("@smoke"));
        assert!(acc.take_state().is_empty());
    }

    #[test]
    fn test_duration_fallback_without_start() {
        let acc = accumulator();
        let test = tagged("@C9").with_duration(Duration::from_secs(7));
        acc.test_passed(&test);

        acc.inspect(|state| assert_eq!(state.passed[0].elapsed.to_string(), "7s"));
    }

    #[test]
    fn test_start_is_consumed_by_terminal_event() {
        let mut state = ExecutionState::default();
        let test = tagged("@C10").with_duration(Duration::from_secs(30));
        let start = Instant::now();
        state.record_start(test.key(), start);

        let elapsed = state.finish(&test, start + Duration::from_secs(4));
        assert_eq!(elapsed.secs(), 4);
        // a second terminal event for the same test falls back to the duration
        assert_eq!(state.finish(&test, start).secs(), 30);
    }

    #[test]
    fn test_worker_batch_uses_same_rules() {
        use crate::event::WorkerTestRecord;

        let acc = accumulator();
        let record = |tag: &str, outcome, secs| WorkerTestRecord {
            test: tagged(tag).with_duration(Duration::from_secs(secs)),
            outcome,
            error: None,
            screenshot: Some("worker_failed.png".to_string()),
        };
        acc.ingest_workers(&AggregatedResult {
            tests: vec![
                record("@C1", TestOutcome::Failed, 2),
                record("@C1", TestOutcome::Passed, 3),
                record("@C2", TestOutcome::Failed, 4),
                record("@C3", TestOutcome::Skipped, 0),
            ],
        });

        let state = acc.take_state();
        assert_eq!(ids(&state.passed), vec!["1"]);
        assert_eq!(state.passed[0].elapsed.secs(), 3);
        assert_eq!(ids(&state.failed), vec!["2"]);
        assert_eq!(state.attachments_by_case[&CaseId::new("2")], "worker_failed.png");
        assert_eq!(state.errors_by_case[&CaseId::new("2")].to_comment_text(), "Test failed");
        assert_eq!(ids(&state.skipped), vec!["3"]);
        assert_eq!(
            state.case_ids(),
            vec![CaseId::new("1"), CaseId::new("2"), CaseId::new("3")]
        );
    }

    struct SlowCapture {
        dir: PathBuf,
        delay: Duration,
        names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScreenshotCapture for SlowCapture {
        fn output_dir(&self) -> &Path {
            &self.dir
        }

        async fn save_screenshot(&self, file_name: &str) -> CaptureResult<()> {
            tokio::time::sleep(self.delay).await;
            self.names.lock().unwrap().push(file_name.to_string());
            Ok(())
        }
    }

    fn slow_capture(delay: Duration) -> Arc<SlowCapture> {
        Arc::new(SlowCapture {
            dir: PathBuf::from("output"),
            delay,
            names: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_pass_during_failure_screenshot_keeps_pass() {
        let acc = accumulator().with_capture(slow_capture(Duration::from_millis(200)));
        let test = tagged("@C1");
        let error: ErrorDetail = "flaky".into();

        tokio::join!(acc.test_failed(&test, &error), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            acc.test_passed(&test);
        });

        let state = acc.take_state();
        assert_eq!(ids(&state.passed), vec!["1"]);
        assert!(state.failed.is_empty());
        assert!(state.attachments_by_case.is_empty());
        assert_eq!(state.errors_by_case[&CaseId::new("1")].to_comment_text(), "flaky");
    }

    #[tokio::test]
    async fn test_failure_with_several_cases_takes_one_screenshot() {
        let capture = slow_capture(Duration::ZERO);
        let acc = accumulator().with_capture(capture.clone());
        let test = tagged("@C1").with_tag("@C2");

        acc.test_failed(&test, &"boom".into()).await;

        let names = capture.names.lock().unwrap().clone();
        assert_eq!(names.len(), 1);
        let state = acc.take_state();
        assert_eq!(ids(&state.failed), vec!["1", "2"]);
        assert_eq!(state.attachments_by_case[&CaseId::new("1")], names[0]);
        assert_eq!(state.attachments_by_case[&CaseId::new("2")], names[0]);
    }
}
