//! Selection of the remote run that receives the results.
//!
//! ```text
//!                  ┌─ plan.existing_plan_id ─► add_plan_entry ─► entry.runs[0]  (or run_id override)
//! RunTarget::plan ─┼─ plan without id ───────► add_plan ───────► entries[0].runs[0]
//!                  ├─ run_id ────────────────► existing run ──┐
//!                  └─ otherwise ─────────────► add_run ───────┴► get_run, update_run(case_ids) unless in a plan
//! ```
//!
//! Every remote step degrades: a failed call is logged by the client and
//! resolution yields `None`, which makes the publisher skip the submission.

use tracing::{info, warn};

use crate::case_id::CaseId;
use crate::client::{
    ConfigGroup, NewPlan, NewPlanEntry, NewPlanRun, NewRun, RunUpdate, TestRailClient,
};
use crate::config::{ConfigurationRef, TestRailConfig};

/// Where a plan entry goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanRef {
    Existing(u64),
    New {
        name: String,
        description: Option<String>,
    },
}

/// The remote destination chosen from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// Report into a run that already exists.
    ExistingRun { run_id: u64 },

    /// Create a standalone run.
    NewRun {
        project_id: u64,
        suite_id: u64,
        name: String,
    },

    /// Create a plan entry, in a new or an existing plan.
    PlanEntry {
        plan: PlanRef,
        suite_id: u64,
        name: String,
        description: Option<String>,
        /// Cases the entry is restricted to; `None` includes the whole suite.
        case_ids: Option<Vec<CaseId>>,
        /// Run to report into instead of the entry's first run.
        run_override: Option<u64>,
    },
}

impl RunTarget {
    /// Decides the destination without talking to the server.
    pub fn plan(config: &TestRailConfig, suite_id: u64, case_ids: &[CaseId]) -> Self {
        let name = config.effective_run_name();

        let Some(plan) = &config.plan else {
            return match config.run_id {
                Some(run_id) => RunTarget::ExistingRun { run_id },
                None => RunTarget::NewRun {
                    project_id: config.project_id,
                    suite_id,
                    name,
                },
            };
        };

        let case_ids = plan.only_case_ids.then(|| case_ids.to_vec());
        match plan.existing_plan_id {
            Some(plan_id) => RunTarget::PlanEntry {
                plan: PlanRef::Existing(plan_id),
                suite_id,
                name,
                description: plan.description.clone(),
                case_ids,
                run_override: config.run_id,
            },
            None => RunTarget::PlanEntry {
                plan: PlanRef::New {
                    name: plan.name.clone().unwrap_or_else(|| name.clone()),
                    description: plan.description.clone(),
                },
                suite_id,
                name,
                description: plan.description.clone(),
                case_ids,
                run_override: None,
            },
        }
    }
}

/// The run results are submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRun {
    pub run_id: u64,
    pub suite_id: u64,
    /// The run belongs to a plan; its case list cannot be updated directly.
    pub in_plan: bool,
}

/// Resolves suite, configurations and run against the server.
pub struct RunResolver<'a> {
    client: &'a TestRailClient,
    config: &'a TestRailConfig,
}

impl<'a> RunResolver<'a> {
    pub fn new(client: &'a TestRailClient, config: &'a TestRailConfig) -> Self {
        Self { client, config }
    }

    /// The configured suite, or the project's first suite.
    pub async fn resolve_suite(&self) -> Option<u64> {
        if let Some(suite_id) = self.config.suite_id {
            return Some(suite_id);
        }

        let suites = self.client.get_suites(self.config.project_id).await.ok()?;
        match suites.first() {
            Some(suite) => {
                info!("Using suite {} ({}) of project {}", suite.id, suite.name, self.config.project_id);
                Some(suite.id)
            }
            None => {
                warn!("Project {} has no suites", self.config.project_id);
                None
            }
        }
    }

    /// Configuration ids for the configured group/name pair. Unknown names
    /// yield no ids.
    pub async fn resolve_config_ids(&self) -> Vec<u64> {
        let Some(reference) = &self.config.configuration else {
            return Vec::new();
        };
        let Ok(groups) = self.client.get_configs(self.config.project_id).await else {
            return Vec::new();
        };

        let ids = match_config_ids(&groups, reference);
        if ids.is_empty() {
            warn!(
                "Configuration {}/{} not found in project {}",
                reference.group_name, reference.config_name, self.config.project_id
            );
        }
        ids
    }

    /// Finds or creates the run for `case_ids`.
    pub async fn resolve(&self, suite_id: u64, case_ids: &[CaseId]) -> Option<ResolvedRun> {
        match RunTarget::plan(self.config, suite_id, case_ids) {
            RunTarget::PlanEntry {
                plan,
                suite_id,
                name,
                description,
                case_ids: entry_cases,
                run_override,
            } => {
                let config_ids = self.resolve_config_ids().await;
                let entry = plan_entry(suite_id, name, description, entry_cases, config_ids);
                let run_id = self.resolve_plan_run(plan, entry, run_override).await?;
                info!("Reporting into run {} of a test plan", run_id);
                Some(ResolvedRun {
                    run_id,
                    suite_id,
                    in_plan: true,
                })
            }
            RunTarget::ExistingRun { run_id } => self.prepare_run(run_id, suite_id, case_ids).await,
            RunTarget::NewRun {
                project_id,
                suite_id,
                name,
            } => {
                let new_run = NewRun {
                    suite_id,
                    name,
                    description: None,
                    include_all: false,
                };
                let run = self.client.add_run(project_id, &new_run).await.ok()?;
                info!("Created run {} ({})", run.id, run.name);
                self.prepare_run(run.id, suite_id, case_ids).await
            }
        }
    }

    async fn resolve_plan_run(
        &self,
        plan: PlanRef,
        entry: NewPlanEntry,
        run_override: Option<u64>,
    ) -> Option<u64> {
        let run_id = match plan {
            PlanRef::Existing(plan_id) => {
                let created = self.client.add_plan_entry(plan_id, &entry).await.ok()?;
                run_override.or_else(|| created.runs.first().map(|run| run.id))
            }
            PlanRef::New { name, description } => {
                let new_plan = NewPlan {
                    name,
                    description,
                    entries: vec![entry],
                };
                let plan = self
                    .client
                    .add_plan(self.config.project_id, &new_plan)
                    .await
                    .ok()?;
                info!("Created plan {}", plan.id);
                plan.entries
                    .first()
                    .and_then(|entry| entry.runs.first())
                    .map(|run| run.id)
            }
        };

        if run_id.is_none() {
            warn!("The plan entry did not create any run");
        }
        run_id
    }

    /// Loads the run and pushes the case list into it unless the run belongs
    /// to a plan.
    async fn prepare_run(&self, run_id: u64, suite_id: u64, case_ids: &[CaseId]) -> Option<ResolvedRun> {
        let run = match self.client.get_run(run_id).await {
            Ok(run) => run,
            Err(_) => {
                warn!("Cannot load run {}, its case list is left unchanged", run_id);
                return Some(ResolvedRun {
                    run_id,
                    suite_id,
                    in_plan: false,
                });
            }
        };

        if run.plan_id.is_some() {
            info!("Run {} belongs to plan {:?}, not updating its cases", run_id, run.plan_id);
        } else {
            let update = RunUpdate {
                case_ids: case_ids.to_vec(),
            };
            // a failed update is logged by the client; results for cases
            // outside the run will be rejected by the server
            let _ = self.client.update_run(run_id, &update).await;
        }

        Some(ResolvedRun {
            run_id,
            suite_id,
            in_plan: run.plan_id.is_some(),
        })
    }
}

/// Config ids of `reference` among the project's configuration groups.
pub fn match_config_ids(groups: &[ConfigGroup], reference: &ConfigurationRef) -> Vec<u64> {
    groups
        .iter()
        .filter(|group| group.name == reference.group_name)
        .flat_map(|group| &group.configs)
        .filter(|config| config.name == reference.config_name)
        .map(|config| config.id)
        .collect()
}

fn plan_entry(
    suite_id: u64,
    name: String,
    description: Option<String>,
    case_ids: Option<Vec<CaseId>>,
    config_ids: Vec<u64>,
) -> NewPlanEntry {
    let include_all = case_ids.is_none();
    let case_ids = case_ids.unwrap_or_default();
    let runs = if config_ids.is_empty() {
        Vec::new()
    } else {
        vec![NewPlanRun {
            include_all,
            case_ids: case_ids.clone(),
            config_ids: config_ids.clone(),
        }]
    };

    NewPlanEntry {
        suite_id,
        name,
        description,
        include_all,
        case_ids,
        config_ids,
        runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConfigItem;
    use crate::config::PlanConfig;

    fn config() -> TestRailConfig {
        TestRailConfig {
            host: "https://example.testrail.io".to_string(),
            user: "ci".to_string(),
            password: "secret".to_string(),
            project_id: 4,
            run_name: Some("Nightly".to_string()),
            ..Default::default()
        }
    }

    fn ids(raw: &[&str]) -> Vec<CaseId> {
        raw.iter().map(|id| CaseId::new(*id)).collect()
    }

    #[test]
    fn test_target_new_run_by_default() {
        let target = RunTarget::plan(&config(), 9, &ids(&["1"]));
        assert_eq!(
            target,
            RunTarget::NewRun {
                project_id: 4,
                suite_id: 9,
                name: "Nightly".to_string()
            }
        );
    }

    #[test]
    fn test_target_existing_run() {
        let config = TestRailConfig {
            run_id: Some(77),
            ..config()
        };
        assert_eq!(
            RunTarget::plan(&config, 9, &[]),
            RunTarget::ExistingRun { run_id: 77 }
        );
    }

    #[test]
    fn test_target_existing_plan_restricted_to_cases() {
        let config = TestRailConfig {
            run_id: Some(5),
            plan: Some(PlanConfig {
                existing_plan_id: Some(12),
                only_case_ids: true,
                ..Default::default()
            }),
            ..config()
        };

        match RunTarget::plan(&config, 9, &ids(&["1", "2"])) {
            RunTarget::PlanEntry {
                plan,
                case_ids,
                run_override,
                ..
            } => {
                assert_eq!(plan, PlanRef::Existing(12));
                assert_eq!(case_ids, Some(ids(&["1", "2"])));
                assert_eq!(run_override, Some(5));
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_target_new_plan_uses_run_name_when_unnamed() {
        let config = TestRailConfig {
            plan: Some(PlanConfig::default()),
            ..config()
        };

        match RunTarget::plan(&config, 9, &ids(&["1"])) {
            RunTarget::PlanEntry {
                plan, case_ids, ..
            } => {
                assert_eq!(
                    plan,
                    PlanRef::New {
                        name: "Nightly".to_string(),
                        description: None
                    }
                );
                assert_eq!(case_ids, None);
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_match_config_ids() {
        let groups = vec![
            ConfigGroup {
                id: 1,
                name: "Browsers".to_string(),
                configs: vec![
                    ConfigItem { id: 10, name: "Chrome".to_string() },
                    ConfigItem { id: 11, name: "Firefox".to_string() },
                ],
            },
            ConfigGroup {
                id: 2,
                name: "OS".to_string(),
                configs: vec![ConfigItem { id: 20, name: "Chrome".to_string() }],
            },
        ];

        let reference = |group: &str, name: &str| ConfigurationRef {
            group_name: group.to_string(),
            config_name: name.to_string(),
        };
        assert_eq!(match_config_ids(&groups, &reference("Browsers", "Firefox")), vec![11]);
        assert!(match_config_ids(&groups, &reference("Browsers", "Safari")).is_empty());
        assert!(match_config_ids(&groups, &reference("Devices", "Chrome")).is_empty());
    }

    #[test]
    fn test_plan_entry_with_configs_spawns_run() {
        let entry = plan_entry(3, "Nightly".to_string(), None, Some(ids(&["1"])), vec![10]);
        assert!(!entry.include_all);
        assert_eq!(entry.runs.len(), 1);
        assert_eq!(entry.runs[0].config_ids, vec![10]);
        assert_eq!(entry.runs[0].case_ids, ids(&["1"]));

        let entry = plan_entry(3, "Nightly".to_string(), None, None, vec![]);
        assert!(entry.include_all);
        assert!(entry.runs.is_empty());
    }
}
