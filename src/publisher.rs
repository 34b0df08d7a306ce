//! Turning accumulated outcomes into remote results.
//!
//! Publishing runs once per execution:
//!
//! 1. resolve the suite and, when there is anything to report, the run
//! 2. build one [`ResultPayload`] per recorded outcome
//! 3. fetch the suite's case catalog and pass every payload through the
//!    optional [`ResultProcessor`]
//! 4. drop payloads whose case is not in the catalog, submit the rest in one
//!    batch
//! 5. attach screenshots of failed cases, then close the run if configured
//!
//! Remote failures are logged and end the publication early; they never
//! propagate to the test framework.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Map;
use tracing::{error, info, warn};

use crate::accumulator::{CaseOutcome, ExecutionState};
use crate::capture::wait_for_file;
use crate::case_id::{CaseId, CaseIdExtractor};
use crate::client::{CatalogCase, ResultPayload, TestRailClient};
use crate::config::TestRailConfig;
use crate::event::{ErrorDetail, TestOutcome};
use crate::resolver::RunResolver;

/// Hook that may rewrite or drop each payload before validation.
///
/// Arguments: the payload, its catalog entry if any, all payloads of the
/// batch and the whole catalog. Returning `None` drops the payload.
pub type ResultProcessor = Arc<
    dyn Fn(ResultPayload, Option<&CatalogCase>, &[ResultPayload], &[CatalogCase]) -> Option<ResultPayload>
        + Send
        + Sync,
>;

/// What a publication did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Run the results went to; `None` when no run was resolved.
    pub run_id: Option<u64>,
    /// Size of the fetched case catalog.
    pub catalog_size: Option<usize>,
    /// Payloads accepted by the server.
    pub submitted: usize,
    /// Cases that were reported but are not in the catalog.
    pub missing: Vec<CaseId>,
    /// Payloads dropped by the result processor.
    pub dropped: usize,
    pub attachments_uploaded: usize,
    pub closed: bool,
    /// No case ids were recorded, so no run was touched.
    pub no_op: bool,
}

/// A payload together with what is needed after submission.
#[derive(Debug, Clone)]
struct Candidate {
    outcome: TestOutcome,
    attachment: Option<String>,
    payload: ResultPayload,
}

/// Publishes one execution's results.
pub struct ResultPublisher<'a> {
    client: &'a TestRailClient,
    config: &'a TestRailConfig,
    extractor: &'a CaseIdExtractor,
    processor: Option<ResultProcessor>,
    attachment_dir: PathBuf,
}

impl<'a> ResultPublisher<'a> {
    pub fn new(client: &'a TestRailClient, config: &'a TestRailConfig, extractor: &'a CaseIdExtractor) -> Self {
        Self {
            client,
            config,
            extractor,
            processor: None,
            attachment_dir: config.output_dir.clone(),
        }
    }

    pub fn with_processor(mut self, processor: Option<ResultProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Directory that screenshot names are resolved against.
    pub fn with_attachment_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.attachment_dir = dir.into();
        self
    }

    pub async fn publish(&self, state: &ExecutionState) -> PublishReport {
        let mut report = PublishReport::default();
        let resolver = RunResolver::new(self.client, self.config);

        let Some(suite_id) = resolver.resolve_suite().await else {
            error!(
                "Cannot resolve a suite for project {}, no results are published",
                self.config.project_id
            );
            return report;
        };

        let case_ids = state.case_ids();
        if case_ids.is_empty() {
            // the catalog is still fetched so credentials and ids get checked
            if let Ok(catalog) = self.client.get_cases(self.config.project_id, suite_id).await {
                info!("getCases: found {} test cases in suite {}", catalog.len(), suite_id);
                report.catalog_size = Some(catalog.len());
            }
            info!("There is no TC, hence no test run is created");
            report.no_op = true;
            return report;
        }

        let Some(run) = resolver.resolve(suite_id, &case_ids).await else {
            error!("Cannot resolve a test run, {} results are not published", case_ids.len());
            return report;
        };
        report.run_id = Some(run.run_id);

        let catalog = match self.client.get_cases(self.config.project_id, suite_id).await {
            Ok(catalog) => catalog,
            Err(_) => {
                error!("Cannot validate results without the case catalog, nothing is submitted");
                return report;
            }
        };
        report.catalog_size = Some(catalog.len());

        let candidates = self.build_candidates(state);
        let total = candidates.len();
        let candidates = self.process(candidates, &catalog);
        report.dropped = total - candidates.len();

        let (valid, missing) = partition_by_catalog(candidates, &catalog);
        if !missing.is_empty() {
            let list: Vec<String> = missing.iter().map(|id| self.extractor.tag_for(id)).collect();
            error!(
                "Cannot add results for {} test cases that do not exist in suite {}: {}",
                missing.len(),
                suite_id,
                list.join(", ")
            );
        }
        report.missing = missing;

        if valid.is_empty() {
            warn!("No valid test case results to publish");
            return report;
        }

        let payloads: Vec<ResultPayload> = valid.iter().map(|c| c.payload.clone()).collect();
        if self
            .client
            .add_results_for_cases(run.run_id, &payloads)
            .await
            .is_err()
        {
            return report;
        }
        report.submitted = payloads.len();
        info!("Published {} results to run {}", payloads.len(), run.run_id);

        report.attachments_uploaded = self.upload_attachments(run.run_id, &valid).await;

        if self.config.close_test_run {
            report.closed = self.client.close_run(run.run_id).await.is_ok();
            if report.closed {
                info!("Closed run {}", run.run_id);
            }
        }

        report
    }

    fn build_candidates(&self, state: &ExecutionState) -> Vec<Candidate> {
        let templates = &self.config.test_case;
        let failure_fallback = ErrorDetail::message("Test failed");

        let passed = state.passed.iter().map(|outcome| Candidate {
            outcome: TestOutcome::Passed,
            attachment: None,
            payload: self.payload(outcome, templates.passed_status(), templates.passed_comment(), None),
        });

        let failed = state.failed.iter().map(|outcome| {
            let error = state
                .errors_by_case
                .get(&outcome.case_id)
                .unwrap_or(&failure_fallback)
                .to_comment_text();
            Candidate {
                outcome: TestOutcome::Failed,
                attachment: state.attachments_by_case.get(&outcome.case_id).cloned(),
                payload: self.payload(
                    outcome,
                    templates.failed_status(),
                    templates.failed_comment(),
                    Some(error.as_str()),
                ),
            }
        });

        let skipped = state.skipped.iter().map(|outcome| Candidate {
            outcome: TestOutcome::Skipped,
            attachment: None,
            payload: self.payload(outcome, templates.skipped_status(), templates.skipped_comment(), None),
        });

        passed.chain(failed).chain(skipped).collect()
    }

    fn payload(&self, outcome: &CaseOutcome, status_id: u32, template: &str, error: Option<&str>) -> ResultPayload {
        let tag = self.extractor.tag_for(&outcome.case_id);
        ResultPayload {
            case_id: outcome.case_id.clone(),
            elapsed: outcome.elapsed.to_string(),
            comment: render_comment(template, &tag, &outcome.case_id, error),
            status_id,
            version: self.config.version.clone(),
            extra: Map::new(),
        }
    }

    fn process(&self, candidates: Vec<Candidate>, catalog: &[CatalogCase]) -> Vec<Candidate> {
        let Some(processor) = &self.processor else {
            return candidates;
        };

        let by_id: HashMap<&CaseId, &CatalogCase> = catalog.iter().map(|case| (&case.id, case)).collect();
        let batch: Vec<ResultPayload> = candidates.iter().map(|c| c.payload.clone()).collect();

        candidates
            .into_iter()
            .filter_map(|candidate| {
                let case = by_id.get(&candidate.payload.case_id).copied();
                let payload = processor(candidate.payload, case, &batch, catalog)?;
                Some(Candidate { payload, ..candidate })
            })
            .collect()
    }

    async fn upload_attachments(&self, run_id: u64, submitted: &[Candidate]) -> usize {
        let timeout = self.config.attachment_timeout();
        let mut uploaded = 0;

        for candidate in submitted {
            let Some(file_name) = &candidate.attachment else {
                continue;
            };
            if candidate.outcome != TestOutcome::Failed {
                continue;
            }

            let case_id = &candidate.payload.case_id;
            let Ok(results) = self.client.get_results_for_case(run_id, case_id).await else {
                continue;
            };
            let Some(latest) = results.first() else {
                warn!("No result found for case {} in run {}, skipping attachment", case_id, run_id);
                continue;
            };

            let path = self.attachment_dir.join(file_name);
            if !wait_for_file(&path, timeout).await {
                error!("addAttachmentToResult: ERROR - File at {} doesn't exist!", path.display());
                continue;
            }

            if self.client.add_attachment_to_result(latest.id, &path).await.is_ok() {
                uploaded += 1;
            }
        }

        uploaded
    }
}

/// Fills `{tag}`, `{case_id}` and `{error}`. A failure template without
/// `{error}` gets the error appended on its own line.
pub fn render_comment(template: &str, tag: &str, case_id: &CaseId, error: Option<&str>) -> String {
    let comment = template
        .replace("{tag}", tag)
        .replace("{case_id}", case_id.as_str());

    match error {
        Some(error) if comment.contains("{error}") => comment.replace("{error}", error),
        Some(error) if !error.is_empty() => format!("{comment}\n{error}"),
        _ => comment,
    }
}

/// Splits candidates into those whose case exists in the catalog and the
/// distinct ids of those that do not.
fn partition_by_catalog(candidates: Vec<Candidate>, catalog: &[CatalogCase]) -> (Vec<Candidate>, Vec<CaseId>) {
    let known: std::collections::HashSet<&CaseId> = catalog.iter().map(|case| &case.id).collect();

    let mut missing: Vec<CaseId> = Vec::new();
    let valid = candidates
        .into_iter()
        .filter(|candidate| {
            let case_id = &candidate.payload.case_id;
            if known.contains(case_id) {
                return true;
            }
            if !missing.contains(case_id) {
                missing.push(case_id.clone());
            }
            false
        })
        .collect();

    (valid, missing)
}
