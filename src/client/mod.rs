//! HTTP client for the TestRail v2 API.
//!
//! [`TestRailClient`] is a thin wrapper over `reqwest`: one method per
//! endpoint, basic auth on every request, no retries. Every failed call is
//! logged here with its endpoint; callers decide whether the step can be
//! skipped.
//!
//! Endpoints live below `host + api_path`, where the default API path
//! `/index.php?/api/v2/` turns every endpoint into a query string, e.g.
//! `https://example.testrail.io/index.php?/api/v2/get_cases/1&suite_id=2`.

pub mod models;

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error};

use crate::case_id::CaseId;
use crate::config::TestRailConfig;

pub use models::*;

/// Page size of `get_cases`.
pub const CASES_PAGE_SIZE: usize = 250;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by [`TestRailClient`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("{operation}: request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{operation}: server returned {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("{operation}: cannot decode response: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    /// A local file needed for the request could not be read.
    #[error("{operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Authenticated client for one TestRail instance.
#[derive(Clone)]
pub struct TestRailClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    debug_log: bool,
}

impl TestRailClient {
    /// Builds a client from the reporter configuration.
    pub fn new(config: &TestRailConfig) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            http,
            base_url: format!(
                "{}/{}",
                config.host.trim_end_matches('/'),
                config.api_path.trim_start_matches('/')
            ),
            user: config.user.clone(),
            password: config.password.clone(),
            debug_log: config.debug_log,
        })
    }

    /// Full URL of an endpoint.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub async fn get_suites(&self, project_id: u64) -> ApiResult<Vec<Suite>> {
        self.get("getSuites", &format!("get_suites/{project_id}"))
            .await
    }

    pub async fn get_configs(&self, project_id: u64) -> ApiResult<Vec<ConfigGroup>> {
        self.get("getConfigs", &format!("get_configs/{project_id}"))
            .await
    }

    /// Fetches the whole case catalog of a suite.
    ///
    /// Paginated servers return at most [`CASES_PAGE_SIZE`] cases per page;
    /// pages are requested with a growing offset until a short page arrives.
    pub async fn get_cases(&self, project_id: u64, suite_id: u64) -> ApiResult<Vec<CatalogCase>> {
        let endpoint = format!("get_cases/{project_id}&suite_id={suite_id}");
        let first: CasesResponse = self.get("getCases", &endpoint).await?;

        let mut cases = match first {
            CasesResponse::Bare(cases) => return Ok(cases),
            CasesResponse::Paged { cases } => cases,
        };

        let mut last_page = cases.len();
        let mut offset = CASES_PAGE_SIZE;
        while last_page == CASES_PAGE_SIZE {
            let page: CasesResponse = self
                .get("getCases", &format!("{endpoint}&offset={offset}"))
                .await?;
            let page = match page {
                CasesResponse::Paged { cases } | CasesResponse::Bare(cases) => cases,
            };
            last_page = page.len();
            cases.extend(page);
            offset += CASES_PAGE_SIZE;
        }

        debug!("getCases: fetched {} cases for suite {}", cases.len(), suite_id);
        Ok(cases)
    }

    pub async fn add_run(&self, project_id: u64, run: &NewRun) -> ApiResult<Run> {
        self.post("addRun", &format!("add_run/{project_id}"), run)
            .await
    }

    pub async fn update_run(&self, run_id: u64, update: &RunUpdate) -> ApiResult<Run> {
        self.post("updateRun", &format!("update_run/{run_id}"), update)
            .await
    }

    pub async fn get_run(&self, run_id: u64) -> ApiResult<Run> {
        self.get("getRun", &format!("get_run/{run_id}")).await
    }

    pub async fn add_plan(&self, project_id: u64, plan: &NewPlan) -> ApiResult<Plan> {
        self.post("addPlan", &format!("add_plan/{project_id}"), plan)
            .await
    }

    pub async fn add_plan_entry(&self, plan_id: u64, entry: &NewPlanEntry) -> ApiResult<PlanEntry> {
        self.post("addPlanEntry", &format!("add_plan_entry/{plan_id}"), entry)
            .await
    }

    pub async fn add_results_for_cases(
        &self,
        run_id: u64,
        results: &[ResultPayload],
    ) -> ApiResult<Vec<RemoteResult>> {
        self.post(
            "addResultsForCases",
            &format!("add_results_for_cases/{run_id}"),
            &ResultsBatch { results },
        )
        .await
    }

    /// Results of a case in a run, newest first.
    pub async fn get_results_for_case(
        &self,
        run_id: u64,
        case_id: &CaseId,
    ) -> ApiResult<Vec<RemoteResult>> {
        let response: ResultsResponse = self
            .get(
                "getResultsForCase",
                &format!("get_results_for_case/{run_id}/{case_id}"),
            )
            .await?;
        Ok(match response {
            ResultsResponse::Paged { results } | ResultsResponse::Bare(results) => results,
        })
    }

    /// Uploads a file as multipart field `attachment`.
    pub async fn add_attachment_to_result(&self, result_id: u64, file: &Path) -> ApiResult<Attachment> {
        let operation = "addAttachmentToResult";
        let bytes = tokio::fs::read(file).await.map_err(|source| ApiError::Io {
            operation: operation.to_string(),
            source,
        })?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("attachment", part);

        let endpoint = format!("add_attachment_to_result/{result_id}");
        let request = self.http.post(self.url(&endpoint)).multipart(form);
        self.send(operation, &endpoint, request, || {
            format!("file {}", file.display())
        })
        .await
    }

    pub async fn close_run(&self, run_id: u64) -> ApiResult<Run> {
        self.post("closeRun", &format!("close_run/{run_id}"), &json!({}))
            .await
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str, endpoint: &str) -> ApiResult<T> {
        let request = self.http.get(self.url(endpoint));
        self.send(operation, endpoint, request, String::new).await
    }

    async fn post<B, T>(&self, operation: &str, endpoint: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.http.post(self.url(endpoint)).json(body);
        self.send(operation, endpoint, request, || {
            serde_json::to_string(body).unwrap_or_default()
        })
        .await
    }

    /// Sends a request and decodes its JSON answer. `describe` renders the
    /// request data for logs and is only called when it is logged.
    async fn send<T, F>(
        &self,
        operation: &str,
        endpoint: &str,
        request: reqwest::RequestBuilder,
        describe: F,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> String,
    {
        let result = self.execute(operation, request).await;

        match &result {
            Ok(body) if self.debug_log => {
                debug!("{}: SUCCESS - the request data is {}", operation, describe());
                debug!("{}: SUCCESS - the response data is {}", operation, body);
            }
            Ok(_) => {}
            Err(e) => {
                error!("{}: ERROR - {} failed: {}", operation, endpoint, e);
                if self.debug_log {
                    error!("{}: ERROR - request data was {}", operation, describe());
                }
            }
        }

        let body = result?;
        let text = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(text).map_err(|source| {
            error!("{}: ERROR - unexpected response from {}: {}", operation, endpoint, source);
            ApiError::Decode {
                operation: operation.to_string(),
                source,
            }
        })
    }

    async fn execute(&self, operation: &str, request: reqwest::RequestBuilder) -> ApiResult<String> {
        let transport = |source| ApiError::Transport {
            operation: operation.to_string(),
            source,
        };

        let response = request
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(ApiError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(body)
    }
}

/// TestRail reports failures as `{"error": "..."}`; anything else is passed
/// through truncated.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(message) = value.get("error").and_then(|v| v.as_str())
    {
        return message.to_string();
    }
    body.chars().take(800).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str) -> TestRailConfig {
        TestRailConfig {
            host: host.to_string(),
            user: "ci".to_string(),
            password: "secret".to_string(),
            project_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_url_joins_host_and_api_path() {
        let client = TestRailClient::new(&config("https://example.testrail.io/")).unwrap();
        assert_eq!(
            client.url("get_cases/1&suite_id=2"),
            "https://example.testrail.io/index.php?/api/v2/get_cases/1&suite_id=2"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":"Field :run_id is not a valid test run."}"#),
            "Field :run_id is not a valid test run."
        );
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }
}
