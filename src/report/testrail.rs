//! Reporter that publishes results to TestRail.
//!
//! Outcomes are accumulated per case while the tests run. When the run ends
//! the accumulated state is published exactly once: on
//! [`Reporter::on_run_complete`] in direct mode, or on
//! [`Reporter::on_workers_complete`] when `run_with_workers` is set.
//!
//! # Example
//!
//! ```no_run
//! use testrail_reporter::config::load_config;
//! use testrail_reporter::report::TestRailReporter;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = load_config("testrail.toml".as_ref())?.testrail;
//! let reporter = TestRailReporter::builder(config)
//!     .with_result_processor(|mut payload, _case, _batch, _catalog| {
//!         payload.extra.insert("custom_build".into(), "42".into());
//!         Some(payload)
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{NullReporter, Reporter};
use crate::accumulator::ResultAccumulator;
use crate::capture::{CommandCapture, ScreenshotCapture};
use crate::case_id::CaseIdExtractor;
use crate::client::{ApiError, CatalogCase, ResultPayload, TestRailClient};
use crate::config::{ConfigError, TestRailConfig};
use crate::event::{AggregatedResult, ErrorDetail, TestInfo};
use crate::publisher::{PublishReport, ResultProcessor, ResultPublisher};

/// Errors raised while setting up the reporter.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ApiError),
}

/// Builder for [`TestRailReporter`].
pub struct TestRailReporterBuilder {
    config: TestRailConfig,
    processor: Option<ResultProcessor>,
    capture: Option<Arc<dyn ScreenshotCapture>>,
}

impl TestRailReporterBuilder {
    /// Hook applied to every payload before validation.
    pub fn with_result_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(ResultPayload, Option<&CatalogCase>, &[ResultPayload], &[CatalogCase]) -> Option<ResultPayload>
            + Send
            + Sync
            + 'static,
    {
        self.processor = Some(Arc::new(processor));
        self
    }

    /// Screenshot capability used for failed tests. Overrides
    /// `screenshot_command`.
    pub fn with_capture(mut self, capture: Arc<dyn ScreenshotCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Validates the configuration and creates the reporter.
    pub fn build(self) -> Result<TestRailReporter, SetupError> {
        self.config.validate()?;

        let extractor = CaseIdExtractor::new(&self.config.prefix_tag)?;
        let client = TestRailClient::new(&self.config)?;

        let capture = self.capture.or_else(|| {
            self.config.screenshot_command.as_ref().map(|command| {
                Arc::new(CommandCapture::new(command.clone(), self.config.output_dir.clone()))
                    as Arc<dyn ScreenshotCapture>
            })
        });

        let mut accumulator = ResultAccumulator::new(extractor);
        if let Some(capture) = capture {
            accumulator = accumulator.with_capture(capture);
        }

        Ok(TestRailReporter {
            config: self.config,
            accumulator,
            client,
            processor: self.processor,
            flushed: AtomicBool::new(false),
            last_report: Mutex::new(None),
        })
    }
}

/// Reporter that accumulates case outcomes and publishes them to TestRail.
pub struct TestRailReporter {
    config: TestRailConfig,
    accumulator: ResultAccumulator,
    client: TestRailClient,
    processor: Option<ResultProcessor>,
    flushed: AtomicBool,
    last_report: Mutex<Option<PublishReport>>,
}

impl TestRailReporter {
    pub fn builder(config: TestRailConfig) -> TestRailReporterBuilder {
        TestRailReporterBuilder {
            config,
            processor: None,
            capture: None,
        }
    }

    pub fn accumulator(&self) -> &ResultAccumulator {
        &self.accumulator
    }

    /// Publishes the accumulated outcomes. Only the first call publishes;
    /// later calls return `None`.
    pub async fn flush(&self) -> Option<PublishReport> {
        if self.flushed.swap(true, Ordering::SeqCst) {
            debug!("Results already published, ignoring flush");
            return None;
        }

        let state = self.accumulator.take_state();
        let attachment_dir = self
            .accumulator
            .capture()
            .map(|capture| capture.output_dir().to_path_buf())
            .unwrap_or_else(|| self.config.output_dir.clone());

        let report = ResultPublisher::new(&self.client, &self.config, self.accumulator.extractor())
            .with_processor(self.processor.clone())
            .with_attachment_dir(attachment_dir)
            .publish(&state)
            .await;

        *self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Some(report)
    }

    /// Report of the publication, once it happened.
    pub fn last_report(&self) -> Option<PublishReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Reporter for TestRailReporter {
    async fn on_test_start(&self, test: &TestInfo) {
        self.accumulator.test_started(test);
    }

    async fn on_test_passed(&self, test: &TestInfo) {
        self.accumulator.test_passed(test);
    }

    async fn on_test_failed(&self, test: &TestInfo, error: &ErrorDetail) {
        self.accumulator.test_failed(test, error).await;
    }

    async fn on_test_skipped(&self, test: &TestInfo) {
        self.accumulator.test_skipped(test);
    }

    async fn on_run_complete(&self) {
        if self.config.run_with_workers {
            debug!("Waiting for worker results before publishing");
            return;
        }
        self.flush().await;
    }

    async fn on_workers_complete(&self, result: &AggregatedResult) {
        if !self.config.run_with_workers {
            debug!("Ignoring worker results, run_with_workers is off");
            return;
        }
        self.accumulator.ingest_workers(result);
        self.flush().await;
    }
}

/// Creates the reporter described by `config`: a [`NullReporter`] when
/// reporting is disabled, otherwise a validated [`TestRailReporter`].
pub fn reporter_from_config(config: TestRailConfig) -> Result<Box<dyn Reporter>, SetupError> {
    if !config.enabled {
        info!("TestRail reporting is disabled");
        return Ok(Box::new(NullReporter));
    }
    Ok(Box::new(TestRailReporter::builder(config).build()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TestRailConfig {
        TestRailConfig {
            host: "https://example.testrail.io".to_string(),
            user: "ci".to_string(),
            password: "secret".to_string(),
            project_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = TestRailConfig {
            host: String::new(),
            ..config()
        };
        let err = TestRailReporter::builder(config).build().err().unwrap();
        assert!(matches!(err, SetupError::Config(ConfigError::MissingHost)));
    }

    #[test]
    fn test_disabled_reporter_skips_validation() {
        let config = TestRailConfig {
            enabled: false,
            ..TestRailConfig::default()
        };
        assert!(reporter_from_config(config).is_ok());
    }

    #[tokio::test]
    async fn test_direct_mode_ignores_worker_results() {
        let reporter = TestRailReporter::builder(config()).build().unwrap();
        let result = AggregatedResult {
            tests: vec![crate::event::WorkerTestRecord {
                test: TestInfo::new("Login").with_tag("@C1"),
                outcome: crate::event::TestOutcome::Passed,
                error: None,
                screenshot: None,
            }],
        };

        reporter.on_workers_complete(&result).await;

        assert!(reporter.accumulator().inspect(|state| state.is_empty()));
        assert!(reporter.last_report().is_none());
    }

    #[tokio::test]
    async fn test_worker_mode_waits_for_worker_results() {
        let config = TestRailConfig {
            run_with_workers: true,
            ..config()
        };
        let reporter = TestRailReporter::builder(config).build().unwrap();
        reporter.on_test_passed(&TestInfo::new("Login").with_tag("@C1")).await;

        reporter.on_run_complete().await;

        assert!(reporter.last_report().is_none());
        assert!(!reporter.accumulator().inspect(|state| state.is_empty()));
    }
}
