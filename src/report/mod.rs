//! Test reporting.

pub mod testrail;

use std::sync::Mutex;

use async_trait::async_trait;

use crate::event::{AggregatedResult, ErrorDetail, TestInfo, TestOutcome};

pub use testrail::{SetupError, TestRailReporter, TestRailReporterBuilder, reporter_from_config};

/// A test reporter receives events during test execution.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called when a test starts running.
    async fn on_test_start(&self, test: &TestInfo);

    /// Called when a test passes.
    async fn on_test_passed(&self, test: &TestInfo);

    /// Called when a test fails. Retries of a test report again.
    async fn on_test_failed(&self, test: &TestInfo, error: &ErrorDetail);

    /// Called when a test is skipped.
    async fn on_test_skipped(&self, test: &TestInfo);

    /// Called when all tests of this process have completed.
    async fn on_run_complete(&self);

    /// Called with the combined results of parallel workers.
    async fn on_workers_complete(&self, result: &AggregatedResult);
}

/// A reporter that does nothing (for testing or when reporting is disabled).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_test_start(&self, _test: &TestInfo) {}
    async fn on_test_passed(&self, _test: &TestInfo) {}
    async fn on_test_failed(&self, _test: &TestInfo, _error: &ErrorDetail) {}
    async fn on_test_skipped(&self, _test: &TestInfo) {}
    async fn on_run_complete(&self) {}
    async fn on_workers_complete(&self, _result: &AggregatedResult) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Create a new multi-reporter.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter to the multi-reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    /// Add an already boxed reporter.
    pub fn with_boxed(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_test_start(&self, test: &TestInfo) {
        for reporter in &self.reporters {
            reporter.on_test_start(test).await;
        }
    }

    async fn on_test_passed(&self, test: &TestInfo) {
        for reporter in &self.reporters {
            reporter.on_test_passed(test).await;
        }
    }

    async fn on_test_failed(&self, test: &TestInfo, error: &ErrorDetail) {
        for reporter in &self.reporters {
            reporter.on_test_failed(test, error).await;
        }
    }

    async fn on_test_skipped(&self, test: &TestInfo) {
        for reporter in &self.reporters {
            reporter.on_test_skipped(test).await;
        }
    }

    async fn on_run_complete(&self) {
        for reporter in &self.reporters {
            reporter.on_run_complete().await;
        }
    }

    async fn on_workers_complete(&self, result: &AggregatedResult) {
        for reporter in &self.reporters {
            reporter.on_workers_complete(result).await;
        }
    }
}

/// Tally of terminal events seen by [`ConsoleReporter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Titles and error texts of failed tests, in report order.
    pub failures: Vec<(String, String)>,
}

impl Tally {
    fn record(&mut self, test: &TestInfo, outcome: TestOutcome, error: Option<&ErrorDetail>) {
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::Failed => {
                self.failed += 1;
                let message = error.map(ErrorDetail::to_comment_text).unwrap_or_default();
                self.failures.push((test.title.clone(), message));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// Console reporter that prints each outcome and a summary.
pub struct ConsoleReporter {
    tally: Mutex<Tally>,
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new(verbose: bool) -> Self {
        Self {
            tally: Mutex::new(Tally::default()),
            verbose,
        }
    }

    /// Current counts.
    pub fn tally(&self) -> Tally {
        self.tally
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn record(&self, test: &TestInfo, outcome: TestOutcome, error: Option<&ErrorDetail>) {
        let status = match outcome {
            TestOutcome::Passed => console::style("PASS").green(),
            TestOutcome::Failed => console::style("FAIL").red(),
            TestOutcome::Skipped => console::style("SKIP").yellow(),
        };
        if self.verbose || outcome != TestOutcome::Passed {
            println!("{} {}", status, test.title);
        }

        self.tally
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .record(test, outcome, error);
    }

    fn print_summary(&self) {
        let tally = self.tally();

        println!();
        println!("Test Results:");
        println!("  Total:   {}", tally.total());
        println!("  Passed:  {}", console::style(tally.passed).green());
        println!("  Failed:  {}", console::style(tally.failed).red());
        println!("  Skipped: {}", console::style(tally.skipped).yellow());

        println!();
        if tally.failed == 0 {
            println!("{}", console::style("All tests passed!").green().bold());
            return;
        }

        println!("{}", console::style("Some tests failed.").red().bold());
        println!();
        println!("Failed tests:");
        for (title, message) in &tally.failures {
            println!("  - {}", title);
            if !message.is_empty() {
                println!("    {}", console::style(message).dim());
            }
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_test_start(&self, test: &TestInfo) {
        if self.verbose {
            println!("Running: {}", test.title);
        }
    }

    async fn on_test_passed(&self, test: &TestInfo) {
        self.record(test, TestOutcome::Passed, None);
    }

    async fn on_test_failed(&self, test: &TestInfo, error: &ErrorDetail) {
        self.record(test, TestOutcome::Failed, Some(error));
    }

    async fn on_test_skipped(&self, test: &TestInfo) {
        self.record(test, TestOutcome::Skipped, None);
    }

    async fn on_run_complete(&self) {
        self.print_summary();
    }

    async fn on_workers_complete(&self, result: &AggregatedResult) {
        for record in &result.tests {
            self.record(&record.test, record.outcome, record.error.as_ref());
        }
        self.print_summary();
    }
}
