//! Request and response bodies of the TestRail v2 API.
//!
//! Only the fields the reporter reads or writes are modelled; unknown fields
//! of catalog cases are kept in `extra` so result processors can see them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::case_id::CaseId;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Suite {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// A configuration group such as `Browsers` with its configurations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigGroup {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub configs: Vec<ConfigItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigItem {
    pub id: u64,
    pub name: String,
}

/// One case of the remote catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCase {
    pub id: CaseId,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `get_cases` answers with a bare array on older servers and with a
/// paginated envelope on newer ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CasesResponse {
    Paged { cases: Vec<CatalogCase> },
    Bare(Vec<CatalogCase>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Run {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plan_id: Option<u64>,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRun {
    pub suite_id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub include_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunUpdate {
    pub case_ids: Vec<CaseId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plan {
    pub id: u64,
    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub runs: Vec<Run>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPlan {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub entries: Vec<NewPlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPlanEntry {
    pub suite_id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub include_all: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub case_ids: Vec<CaseId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<NewPlanRun>,
}

/// A run spawned by a plan entry for one combination of configurations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPlanRun {
    pub include_all: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub case_ids: Vec<CaseId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_ids: Vec<u64>,
}

/// One result submitted through `add_results_for_cases`.
///
/// `extra` carries fields added by a result processor, such as custom
/// `custom_*` result fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub case_id: CaseId,
    pub elapsed: String,
    pub comment: String,
    pub status_id: u32,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResultsBatch<'a> {
    pub results: &'a [ResultPayload],
}

/// A result stored on the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteResult {
    pub id: u64,
    #[serde(default)]
    pub test_id: Option<u64>,
    #[serde(default)]
    pub status_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ResultsResponse {
    Paged { results: Vec<RemoteResult> },
    Bare(Vec<RemoteResult>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Attachment {
    pub attachment_id: Value,
}
