//! testrail-reporter: publish test framework results to TestRail.
//!
//! The reporter listens to the lifecycle of a test run, maps tests to
//! TestRail cases through tags such as `@C123`, and publishes one result per
//! case when the run ends.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Case ids**: find case ids in test tags and titles ([`case_id`])
//! - **Accumulator**: fold test events into per-case outcomes, collapsing
//!   retries ([`accumulator`])
//! - **Resolver**: choose or create the remote run or plan entry ([`resolver`])
//! - **Publisher**: validate against the case catalog, submit results,
//!   upload screenshots and close the run ([`publisher`])
//! - **Client**: the TestRail REST API ([`client`])
//! - **Report**: reporter hooks tying it together ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use testrail_reporter::config::load_config;
//! use testrail_reporter::event::{ErrorDetail, TestInfo};
//! use testrail_reporter::report::{Reporter, reporter_from_config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("testrail.toml"))?;
//!     let reporter = reporter_from_config(config.testrail)?;
//!
//!     let test = TestInfo::new("Login works").with_tag("@C12");
//!     reporter.on_test_start(&test).await;
//!     reporter.on_test_failed(&test, &ErrorDetail::message("timeout")).await;
//!     reporter.on_run_complete().await;
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod capture;
pub mod case_id;
pub mod client;
pub mod config;
pub mod event;
pub mod publisher;
pub mod report;
pub mod resolver;

// Re-export commonly used types
pub use accumulator::{ExecutionState, ResultAccumulator};
pub use case_id::{CaseId, CaseIdExtractor};
pub use client::TestRailClient;
pub use config::{Config, TestRailConfig, load_config};
pub use event::{AggregatedResult, ErrorDetail, TestEvent, TestInfo, TestOutcome};
pub use publisher::{PublishReport, ResultProcessor, ResultPublisher};
pub use report::{Reporter, TestRailReporter};
pub use resolver::{RunResolver, RunTarget};
