//! Configuration schema definitions for the TestRail reporter.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every table below lives under the root
//! `[testrail]` key.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! └── TestRailConfig          - Connection, run selection and reporting
//!     ├── PlanConfig          - Optional: report into a test plan
//!     ├── ConfigurationRef    - Optional: group/name of a remote configuration
//!     └── TestCaseConfig      - Status ids and comments per outcome
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [testrail]
/// host = "https://example.testrail.io"
/// user = "ci@example.com"
/// password = "api-key"
/// project_id = 1
/// suite_id = 3
///
/// [testrail.test_case.failed]
/// comment = "Broken on {tag}: {error}"
/// ```
///
/// # Example
///
/// ```
/// use testrail_reporter::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [testrail]
///     host = "https://example.testrail.io"
///     user = "ci"
///     password = "secret"
///     project_id = 1
/// "#).unwrap();
/// assert_eq!(config.testrail.prefix_tag, "@C");
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Reporter settings.
    pub testrail: TestRailConfig,
}

/// Errors raised while validating a configuration at setup time.
///
/// These are the only fatal errors of the reporter: everything that happens
/// after setup is logged and degraded instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Please provide proper Testrail host")]
    MissingHost,

    #[error("Please provide proper Testrail user")]
    MissingUser,

    #[error("Please provide proper Testrail password")]
    MissingPassword,

    #[error("Please provide project id in config file")]
    MissingProjectId,

    #[error("Invalid prefix tag `{0}`: {1}")]
    InvalidPrefix(String, String),
}

/// Connection, run selection and reporting settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `api_path` | `/index.php?/api/v2/` |
/// | `prefix_tag` | `@C` |
/// | `close_test_run` | true |
/// | `version` | `"1"` |
/// | `enabled` | true |
/// | `output_dir` | `output` |
/// | `attachment_timeout_ms` | 3000 |
/// | `request_timeout_secs` | 30 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestRailConfig {
    /// Base URL of the TestRail instance, e.g. `https://example.testrail.io`.
    #[serde(default)]
    pub host: String,

    /// Path of the v2 API below `host`.
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Basic-auth user.
    #[serde(default)]
    pub user: String,

    /// Basic-auth password or API key.
    #[serde(default)]
    pub password: String,

    /// Project that owns the suites, runs and plans.
    #[serde(default)]
    pub project_id: u64,

    /// Suite to report into. Resolved to the project's first suite when
    /// absent.
    pub suite_id: Option<u64>,

    /// Existing run to report into instead of creating one.
    pub run_id: Option<u64>,

    /// Name for created runs and plan entries.
    ///
    /// Default: `New test run on <dd/mm/yyyy HH:MM:SS>` in local time.
    pub run_name: Option<String>,

    /// Tag prefix that marks a case id, e.g. `@C` in `@C1234`.
    #[serde(default = "default_prefix_tag")]
    pub prefix_tag: String,

    /// Report into a test plan instead of a standalone run.
    pub plan: Option<PlanConfig>,

    /// Remote configuration to attach plan runs to.
    pub configuration: Option<ConfigurationRef>,

    /// Close the run after results were submitted.
    #[serde(default = "default_true")]
    pub close_test_run: bool,

    /// Build or version tag submitted with every result.
    #[serde(default = "default_version")]
    pub version: String,

    /// Status ids and comment templates per outcome.
    #[serde(default)]
    pub test_case: TestCaseConfig,

    /// Render request and response bodies in debug logs.
    #[serde(default)]
    pub debug_log: bool,

    /// When false the reporter is inert and no events are handled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Results arrive as one aggregated batch from parallel workers.
    ///
    /// In this mode the flush fires on the workers-finished event instead
    /// of the all-tests-finished event.
    #[serde(default)]
    pub run_with_workers: bool,

    /// Directory where screenshots of failed tests are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Shell command that captures a screenshot. `{file}` is replaced with
    /// the absolute target path. Screenshots are disabled when unset.
    pub screenshot_command: Option<String>,

    /// How long to wait for a screenshot file before giving up on its upload.
    ///
    /// Values below 1000 are raised to 1000.
    #[serde(default = "default_attachment_timeout")]
    pub attachment_timeout_ms: u64,

    /// Timeout for a single API request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TestRailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_path: default_api_path(),
            user: String::new(),
            password: String::new(),
            project_id: 0,
            suite_id: None,
            run_id: None,
            run_name: None,
            prefix_tag: default_prefix_tag(),
            plan: None,
            configuration: None,
            close_test_run: true,
            version: default_version(),
            test_case: TestCaseConfig::default(),
            debug_log: false,
            enabled: true,
            run_with_workers: false,
            output_dir: default_output_dir(),
            screenshot_command: None,
            attachment_timeout_ms: default_attachment_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl TestRailConfig {
    /// Checks the settings that are required before any event is handled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingUser);
        }
        if self.password.trim().is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        if self.project_id == 0 {
            return Err(ConfigError::MissingProjectId);
        }
        if self.prefix_tag.is_empty() {
            return Err(ConfigError::InvalidPrefix(
                self.prefix_tag.clone(),
                "prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured run name, or a name stamped with the current local time.
    pub fn effective_run_name(&self) -> String {
        match &self.run_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!(
                "New test run on {}",
                chrono::Local::now().format("%d/%m/%Y %H:%M:%S")
            ),
        }
    }

    /// Poll window for screenshot files, never shorter than one second.
    pub fn attachment_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.attachment_timeout_ms.max(1000))
    }
}

fn default_api_path() -> String {
    "/index.php?/api/v2/".to_string()
}

fn default_prefix_tag() -> String {
    "@C".to_string()
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_attachment_timeout() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

/// Report into a test plan.
///
/// With `existing_plan_id` a new entry is added to that plan; without it a
/// new plan is created with a single entry.
///
/// # Example
///
/// ```toml
/// [testrail.plan]
/// existing_plan_id = 12
/// only_case_ids = true
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlanConfig {
    /// Plan to extend.
    pub existing_plan_id: Option<u64>,

    /// Name of a created plan. Falls back to the run name.
    pub name: Option<String>,

    /// Description of the created plan or plan entry.
    pub description: Option<String>,

    /// Restrict the plan entry to the reported case ids instead of the whole
    /// suite.
    #[serde(default)]
    pub only_case_ids: bool,
}

/// A remote configuration selected by group and name, e.g. `Browsers` /
/// `Chrome`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigurationRef {
    pub group_name: String,
    pub config_name: String,
}

/// Status id and comment template for one outcome.
///
/// Comment templates understand `{tag}` (prefix and id, e.g. `@C12`),
/// `{case_id}` and, for failures, `{error}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutcomeTemplate {
    pub status_id: Option<u32>,
    pub comment: Option<String>,
}

/// Per-outcome overrides.
///
/// | Outcome | Status id | Comment |
/// |---------|-----------|---------|
/// | passed | 1 | `Test case {tag} passed` |
/// | failed | 5 | `Test case {tag} failed: {error}` |
/// | skipped | 2 | `Test case {tag} was skipped` |
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestCaseConfig {
    #[serde(default)]
    pub passed: OutcomeTemplate,
    #[serde(default)]
    pub failed: OutcomeTemplate,
    #[serde(default)]
    pub skipped: OutcomeTemplate,
}

/// TestRail "Passed".
pub const STATUS_PASSED: u32 = 1;
/// TestRail "Blocked", used for skipped tests.
pub const STATUS_BLOCKED: u32 = 2;
/// TestRail "Failed".
pub const STATUS_FAILED: u32 = 5;

impl TestCaseConfig {
    pub fn passed_status(&self) -> u32 {
        self.passed.status_id.unwrap_or(STATUS_PASSED)
    }

    pub fn failed_status(&self) -> u32 {
        self.failed.status_id.unwrap_or(STATUS_FAILED)
    }

    pub fn skipped_status(&self) -> u32 {
        self.skipped.status_id.unwrap_or(STATUS_BLOCKED)
    }

    pub fn passed_comment(&self) -> &str {
        self.passed
            .comment
            .as_deref()
            .unwrap_or("Test case {tag} passed")
    }

    pub fn failed_comment(&self) -> &str {
        self.failed
            .comment
            .as_deref()
            .unwrap_or("Test case {tag} failed: {error}")
    }

    pub fn skipped_comment(&self) -> &str {
        self.skipped
            .comment
            .as_deref()
            .unwrap_or("Test case {tag} was skipped")
    }
}
