//! Case identifiers and their extraction from test metadata.
//!
//! A test is linked to remote cases by tags such as `@C1234`. Tags are
//! matched against the configured prefix with an anchored pattern, so a tag
//! like `@Cleanup1` or `x@C12` never yields an id.
//!
//! Data-driven scenarios expand one scenario into several rows; each row's
//! title carries its own case marker as JSON, e.g.
//! `login | {"user":"bob","testRailTag":"@C12"}`. That marker is turned into
//! an extra tag before the regular tag scan.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ConfigError;

/// Identifier of a remote test case.
///
/// TestRail returns ids as JSON numbers while tags yield strings; both
/// deserialize to the same `CaseId`, which always serializes as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseId(String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for CaseId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for CaseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Serialize for CaseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CaseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => CaseId::from(n),
            Raw::Text(s) => CaseId(s),
        })
    }
}

static TABLE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""testRailTag"\s*:\s*"([^"]+)""#).expect("table marker pattern is valid")
});

/// Finds case ids in test tags using a configurable prefix.
#[derive(Debug, Clone)]
pub struct CaseIdExtractor {
    prefix: String,
    pattern: Regex,
}

impl CaseIdExtractor {
    /// Builds an extractor for tags of the form `<prefix><digits>`.
    pub fn new(prefix: &str) -> Result<Self, ConfigError> {
        if prefix.is_empty() {
            return Err(ConfigError::InvalidPrefix(
                prefix.to_string(),
                "prefix must not be empty".to_string(),
            ));
        }
        let pattern = Regex::new(&format!(r"^{}(\d+)$", regex::escape(prefix)))
            .map_err(|e| ConfigError::InvalidPrefix(prefix.to_string(), e.to_string()))?;
        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parses a single tag. Surrounding whitespace is ignored.
    pub fn parse_tag(&self, tag: &str) -> Option<CaseId> {
        self.pattern
            .captures(tag.trim())
            .and_then(|caps| caps.get(1))
            .map(|m| CaseId::new(m.as_str()))
    }

    /// Extracts case ids from a tag list, in order of first appearance.
    pub fn extract<S: AsRef<str>>(&self, tags: &[S]) -> Vec<CaseId> {
        let mut ids: Vec<CaseId> = Vec::new();
        for tag in tags {
            if let Some(id) = self.parse_tag(tag.as_ref())
                && !ids.contains(&id)
            {
                ids.push(id);
            }
        }
        ids
    }

    /// Extracts case ids for one test, honouring the data-table marker in its
    /// title before the regular tags.
    pub fn extract_for_test(&self, title: &str, tags: &[String]) -> Vec<CaseId> {
        match table_marker(title) {
            Some(marker) => {
                let mut all = Vec::with_capacity(tags.len() + 1);
                all.push(marker);
                all.extend(tags.iter().map(String::as_str));
                self.extract(&all)
            }
            None => self.extract(tags),
        }
    }

    /// Renders an id with its prefix, e.g. `@C12`.
    pub fn tag_for(&self, id: &CaseId) -> String {
        format!("{}{}", self.prefix, id)
    }
}

fn table_marker(title: &str) -> Option<&str> {
    TABLE_MARKER
        .captures(title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
