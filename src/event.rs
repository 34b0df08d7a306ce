//! Test lifecycle events consumed by reporters.
//!
//! The host test framework describes each test with a [`TestInfo`] and
//! announces its progress through the hooks of [`crate::report::Reporter`].
//! [`TestEvent`] is the serializable form of the same feed, one JSON object
//! per line, used to replay a recorded run.
//!
//! ```text
//! {"event":"test_started","test":{"id":"t1","title":"Login @C1","tags":["@C1"]}}
//! {"event":"test_failed","test":{"id":"t1","title":"Login @C1","tags":["@C1"]},"error":{"message":"boom"}}
//! {"event":"all_finished"}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::report::Reporter;

/// The framework's view of one test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    /// Stable identity of the test within a run. Retries share it.
    ///
    /// Falls back to the title when empty.
    #[serde(default)]
    pub id: String,

    /// Full test title, possibly carrying a data-table marker.
    pub title: String,

    /// Tags attached to the test, e.g. `["@C12", "@smoke"]`.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Duration measured by the framework, when it reports one.
    #[serde(default, with = "duration_ms", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl TestInfo {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: title.clone(),
            title,
            tags: Vec::new(),
            duration: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Key used to pair start and terminal events.
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.title
        } else {
            &self.id
        }
    }
}

/// Error reported with a failed test.
///
/// Frameworks hand over anything from a plain string to a structured
/// assertion error, so the raw JSON value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorDetail(pub Value);

impl ErrorDetail {
    pub fn message(message: impl Into<String>) -> Self {
        Self(serde_json::json!({ "message": message.into() }))
    }

    /// Text suitable for a result comment: the `message` field without ANSI
    /// escapes when present, otherwise the raw value.
    pub fn to_comment_text(&self) -> String {
        match &self.0 {
            Value::Object(map) => match map.get("message").and_then(Value::as_str) {
                Some(message) => strip_ansi_escapes::strip_str(message),
                None => self.0.to_string(),
            },
            Value::String(text) => strip_ansi_escapes::strip_str(text),
            other => other.to_string(),
        }
    }
}

impl From<&str> for ErrorDetail {
    fn from(message: &str) -> Self {
        Self(Value::String(message.to_string()))
    }
}

/// Outcome of one finished test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
}

/// A test finished by a parallel worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTestRecord {
    pub test: TestInfo,
    pub outcome: TestOutcome,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    /// Screenshot file the worker already wrote, relative to the output
    /// directory.
    #[serde(default)]
    pub screenshot: Option<String>,
}

/// Results collected by all parallel workers, delivered once at the end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    #[serde(default)]
    pub tests: Vec<WorkerTestRecord>,
}

/// Serializable form of the lifecycle feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestEvent {
    TestStarted { test: TestInfo },
    TestPassed { test: TestInfo },
    TestFailed { test: TestInfo, error: ErrorDetail },
    TestSkipped { test: TestInfo },
    AllFinished,
    WorkersFinished { result: AggregatedResult },
}

impl TestEvent {
    /// Hands the event to the matching reporter hook.
    pub async fn dispatch(&self, reporter: &dyn Reporter) {
        match self {
            TestEvent::TestStarted { test } => reporter.on_test_start(test).await,
            TestEvent::TestPassed { test } => reporter.on_test_passed(test).await,
            TestEvent::TestFailed { test, error } => reporter.on_test_failed(test, error).await,
            TestEvent::TestSkipped { test } => reporter.on_test_skipped(test).await,
            TestEvent::AllFinished => reporter.on_run_complete().await,
            TestEvent::WorkersFinished { result } => reporter.on_workers_complete(result).await,
        }
    }
}

/// Parses a JSON-lines event log. Blank lines are ignored.
pub fn parse_event_log(content: &str) -> Result<Vec<TestEvent>, serde_json::Error> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
