//! Change-set execution engine.
//!
//! This module applies a [`ChangeSet`] against a [`Provider`] with:
//! - Teardown of removed and replaced resources, dependents first
//! - Creation and update in dependency waves, bounded by `parallelism`
//! - Per-call retries for throttled and transient provider errors
//! - Partial failure: a failed change skips only what depends on it
//!
//! State is only touched between waves, so it reflects exactly the calls
//! that succeeded.

pub mod report;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::plan::{Action, ChangeSet};
use crate::provider::{Provider, ProviderError, ProviderResource};
use crate::retry::RetryPolicy;
use crate::state::{DeployedResource, StackState};
use crate::template::Template;

pub use report::{ApplyReport, ChangeOutcome, OutcomeStatus};

/// Default number of provider calls in flight per wave.
pub const DEFAULT_PARALLELISM: usize = 4;

/// A single provider call, with references already resolved.
#[derive(Debug, Clone)]
enum Operation {
    Create {
        resource_type: String,
        properties: Value,
    },
    Update {
        resource_type: String,
        physical_id: String,
        properties: Value,
    },
    Delete {
        resource_type: String,
        physical_id: String,
    },
}

/// What came back from one operation.
#[derive(Debug)]
struct StepResult {
    logical_id: String,
    attempts: u32,
    result: std::result::Result<Option<ProviderResource>, ProviderError>,
}

/// Applies change-sets against a provider.
pub struct Executor {
    provider: Arc<dyn Provider>,
    retry_policy: RetryPolicy,
    parallelism: usize,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("provider", &self.provider.name())
            .field("retry_policy", &self.retry_policy)
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

impl Executor {
    /// Create an executor for a provider.
    pub fn new(provider: Arc<dyn Provider>, retry_policy: RetryPolicy) -> Self {
        Self {
            provider,
            retry_policy,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Set the maximum number of concurrent provider calls.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Maximum number of concurrent provider calls.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Apply `change_set`, recording every successful change in `state`.
    ///
    /// Partial failures are reported in the returned [`ApplyReport`]; only
    /// graph errors abort the run before anything is changed.
    #[instrument(skip_all, fields(stack = %state.stack, provider = self.provider.name()))]
    pub async fn apply(
        &self,
        change_set: &ChangeSet,
        template: &Template,
        state: &mut StackState,
    ) -> Result<ApplyReport> {
        let started = Instant::now();
        let old_graph = ResourceGraph::from_state(state)?;
        let new_graph = ResourceGraph::from_template(template)?;

        let actions: HashMap<&str, Action> = change_set
            .actionable()
            .map(|c| (c.logical_id.as_str(), c.action))
            .collect();
        let mut outcomes: HashMap<String, ChangeOutcome> = change_set
            .actionable()
            .map(|c| {
                let mut outcome = ChangeOutcome::new(&c.logical_id, &c.resource_type, c.action);
                outcome.physical_id = c.physical_id.clone();
                (c.logical_id.clone(), outcome)
            })
            .collect();
        // Ids whose change failed or was skipped
        let mut broken: HashSet<String> = HashSet::new();

        info!(
            changes = outcomes.len(),
            parallelism = self.parallelism,
            "Applying change-set"
        );

        // Teardown: dependents before their dependencies
        let mut teardown_levels = old_graph.levels();
        teardown_levels.reverse();
        for level in teardown_levels {
            let mut wave = Vec::new();
            for logical_id in level {
                let Some(action) = actions.get(logical_id.as_str()).copied() else {
                    continue;
                };
                if !matches!(action, Action::Delete | Action::Orphan | Action::Replace) {
                    continue;
                }
                if let Some(cause) = old_graph
                    .dependents(&logical_id)
                    .into_iter()
                    .find(|d| broken.contains(d))
                {
                    halt_on_failed_dependency(&mut outcomes, &mut broken, &logical_id, &cause);
                    continue;
                }
                if action == Action::Orphan {
                    info!(logical_id = %logical_id, "Orphaned resource (retained)");
                    state.remove(&logical_id);
                    continue;
                }
                let Some(deployed) = state.get(&logical_id) else {
                    continue;
                };
                wave.push((
                    logical_id.clone(),
                    Operation::Delete {
                        resource_type: deployed.resource_type.clone(),
                        physical_id: deployed.physical_id.clone(),
                    },
                ));
            }

            for step in self.run_wave(wave).await {
                let Some(outcome) = outcomes.get_mut(&step.logical_id) else {
                    continue;
                };
                outcome.attempts += step.attempts;
                match step.result {
                    Ok(_) => {
                        info!(logical_id = %step.logical_id, "Deleted resource");
                        state.remove(&step.logical_id);
                        outcome.physical_id = None;
                    }
                    Err(error) => {
                        let error = Error::Provider {
                            logical_id: step.logical_id.clone(),
                            source: error,
                        };
                        warn!(logical_id = %step.logical_id, error = %error, "Delete failed");
                        outcome.status = OutcomeStatus::Failed(error.to_string());
                        broken.insert(step.logical_id);
                    }
                }
            }
        }

        // Build: dependencies before their dependents
        for level in new_graph.levels() {
            let mut wave = Vec::new();
            for logical_id in level {
                let Some(action) = actions.get(logical_id.as_str()).copied() else {
                    continue;
                };
                if !matches!(action, Action::Create | Action::Update | Action::Replace) {
                    continue;
                }
                if broken.contains(&logical_id) {
                    continue;
                }
                if let Some(cause) = new_graph
                    .dependencies(&logical_id)
                    .into_iter()
                    .find(|d| broken.contains(d))
                {
                    halt_on_failed_dependency(&mut outcomes, &mut broken, &logical_id, &cause);
                    continue;
                }
                let Some(desired) = template.resource(&logical_id) else {
                    continue;
                };

                let properties = match state.resolve_value(&desired.properties) {
                    Ok(properties) => properties,
                    Err(error) => {
                        warn!(logical_id = %logical_id, error = %error, "Cannot resolve properties");
                        if let Some(outcome) = outcomes.get_mut(&logical_id) {
                            outcome.status = OutcomeStatus::Failed(error.to_string());
                        }
                        broken.insert(logical_id);
                        continue;
                    }
                };

                let operation = match (action, state.get(&logical_id)) {
                    (Action::Update, Some(deployed)) => Operation::Update {
                        resource_type: desired.resource_type.clone(),
                        physical_id: deployed.physical_id.clone(),
                        properties,
                    },
                    _ => Operation::Create {
                        resource_type: desired.resource_type.clone(),
                        properties,
                    },
                };
                wave.push((logical_id, operation));
            }

            for step in self.run_wave(wave).await {
                let Some(outcome) = outcomes.get_mut(&step.logical_id) else {
                    continue;
                };
                outcome.attempts += step.attempts;
                match step.result {
                    Ok(Some(resource)) => {
                        let Some(desired) = template.resource(&step.logical_id) else {
                            continue;
                        };
                        let created_at = state
                            .get(&step.logical_id)
                            .map(|r| r.created_at)
                            .unwrap_or_else(Utc::now);

                        let mut record = DeployedResource::new(
                            &step.logical_id,
                            &desired.resource_type,
                            &resource.physical_id,
                        )
                        .with_properties(desired.properties.clone())
                        .with_attributes(resource.attributes)
                        .with_depends_on(desired.dependencies())
                        .with_deletion_policy(desired.deletion_policy);
                        record.created_at = created_at;

                        info!(
                            logical_id = %step.logical_id,
                            physical_id = %resource.physical_id,
                            action = %outcome.action,
                            "Applied change"
                        );
                        outcome.physical_id = Some(resource.physical_id);
                        state.record(record);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        let error = Error::Provider {
                            logical_id: step.logical_id.clone(),
                            source: error,
                        };
                        warn!(logical_id = %step.logical_id, error = %error, "Change failed");
                        outcome.status = OutcomeStatus::Failed(error.to_string());
                        broken.insert(step.logical_id);
                    }
                }
            }
        }

        state.outputs = resolve_available_outputs(template, state);
        state.bump();

        let report = ApplyReport {
            outcomes: change_set
                .actionable()
                .filter_map(|c| outcomes.remove(&c.logical_id))
                .collect(),
            duration: started.elapsed(),
        };

        info!(
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            skipped = report.skipped().len(),
            serial = state.serial,
            "Apply finished"
        );
        Ok(report)
    }

    async fn run_wave(&self, wave: Vec<(String, Operation)>) -> Vec<StepResult> {
        if wave.is_empty() {
            return Vec::new();
        }
        debug!(size = wave.len(), "Running wave");

        let mut results: Vec<StepResult> = stream::iter(wave)
            .map(|(logical_id, operation)| self.perform(logical_id, operation))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        results.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
        results
    }

    async fn perform(&self, logical_id: String, operation: Operation) -> StepResult {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let provider = &self.provider;

        let result = match &operation {
            Operation::Create {
                resource_type,
                properties,
            } => self
                .retry_policy
                .execute(
                    move || {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        provider.create(resource_type, properties)
                    },
                    ProviderError::is_retryable,
                )
                .await
                .map(Some),
            Operation::Update {
                resource_type,
                physical_id,
                properties,
            } => self
                .retry_policy
                .execute(
                    move || {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        provider.update(resource_type, physical_id, properties)
                    },
                    ProviderError::is_retryable,
                )
                .await
                .map(Some),
            Operation::Delete {
                resource_type,
                physical_id,
            } => self
                .retry_policy
                .execute(
                    move || {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        provider.delete(resource_type, physical_id)
                    },
                    ProviderError::is_retryable,
                )
                .await
                .map(|_| None),
        };

        let result = match result {
            Ok(resource) => Ok(resource),
            Err(error) => match error.into_inner() {
                // Already gone counts as deleted
                ProviderError::NotFound { .. } if matches!(operation, Operation::Delete { .. }) => {
                    debug!(logical_id = %logical_id, "Resource already deleted");
                    Ok(None)
                }
                other => Err(other),
            },
        };

        StepResult {
            logical_id,
            attempts: counter.load(Ordering::Relaxed),
            result,
        }
    }
}

/// Stop `logical_id` because `cause` failed.
///
/// A replacement whose old resource was already deleted counts as failed,
/// not skipped: the provider was called and the resource is gone.
fn halt_on_failed_dependency(
    outcomes: &mut HashMap<String, ChangeOutcome>,
    broken: &mut HashSet<String>,
    logical_id: &str,
    cause: &str,
) {
    if let Some(outcome) = outcomes.get_mut(logical_id) {
        if outcome.attempts > 0 {
            warn!(logical_id, cause, "Deleted resource cannot be recreated, a dependency failed");
            outcome.status = OutcomeStatus::Failed(format!(
                "deleted; recreation skipped because {} failed",
                cause
            ));
        } else {
            debug!(logical_id, cause, "Skipping change, a dependency failed");
            outcome.status = OutcomeStatus::Skipped;
        }
    }
    broken.insert(logical_id.to_string());
}

/// Resolve every output whose references are deployed.
fn resolve_available_outputs(
    template: &Template,
    state: &StackState,
) -> indexmap::IndexMap<String, String> {
    template
        .outputs
        .iter()
        .filter_map(|(name, output)| match state.resolve_value(&output.value) {
            Ok(Value::String(value)) => Some((name.clone(), value)),
            Ok(other) => Some((name.clone(), other.to_string())),
            Err(error) => {
                warn!(output = %name, error = %error, "Output not resolved");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::types;
    use crate::plan::Planner;
    use crate::provider::SandboxProvider;
    use crate::stack::Environment;
    use crate::template::{reference, TemplateOutput, TemplateResource};
    use serde_json::json;
    use std::time::Duration;

    fn template() -> Template {
        let mut template = Template::default();
        template.resources.insert(
            "Vpc".into(),
            TemplateResource::new(
                types::VPC,
                json!({ "CidrBlock": "10.0.0.0/16", "Tags": [{ "Key": "Name", "Value": "test" }] }),
            ),
        );
        template.resources.insert(
            "Subnet".into(),
            TemplateResource::new(
                types::SUBNET,
                json!({
                    "VpcId": reference("Vpc"),
                    "CidrBlock": "10.0.0.0/24",
                    "AvailabilityZone": "ca-central-1a"
                }),
            ),
        );
        template.resources.insert(
            "Cluster".into(),
            TemplateResource::new(types::CLUSTER, json!({ "ClusterName": "c1" })),
        );
        template.outputs.insert(
            "VpcId".into(),
            TemplateOutput {
                value: reference("Vpc"),
                description: None,
                export_name: None,
            },
        );
        template
    }

    fn executor(provider: Arc<SandboxProvider>) -> Executor {
        let policy = RetryPolicy::constant(2, Duration::from_millis(1));
        Executor::new(provider, policy).with_parallelism(2)
    }

    #[tokio::test]
    async fn test_apply_creates_and_records_state() {
        let provider = Arc::new(SandboxProvider::new(Environment::default()));
        let template = template();
        let mut state = StackState::new("test");

        let plan = Planner::new().plan(&template, &state).unwrap();
        let report = executor(provider.clone())
            .apply(&plan, &template, &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.succeeded().len(), 3);
        assert_eq!(provider.resource_count(), 3);
        assert_eq!(state.serial, 1);
        assert!(state.outputs["VpcId"].starts_with("vpc-"));
        assert_eq!(state.get("Subnet").unwrap().depends_on, vec!["Vpc"]);
    }

    #[tokio::test]
    async fn test_throttled_calls_are_retried() {
        let provider = Arc::new(SandboxProvider::new(Environment::default()));
        provider.fail_next(types::CLUSTER, 2, ProviderError::Throttled("rate".into()));
        let template = template();
        let mut state = StackState::new("test");

        let plan = Planner::new().plan(&template, &state).unwrap();
        let report = executor(provider.clone())
            .apply(&plan, &template, &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.outcome("Cluster").unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_failed_create_skips_only_dependents() {
        let provider = Arc::new(SandboxProvider::new(Environment::default()));
        provider.fail_next(types::VPC, 1, ProviderError::Validation("nope".into()));
        let template = template();
        let mut state = StackState::new("test");

        let plan = Planner::new().plan(&template, &state).unwrap();
        let report = executor(provider.clone())
            .apply(&plan, &template, &mut state)
            .await
            .unwrap();

        assert!(!report.is_success());
        assert!(matches!(report.outcome("Vpc").unwrap().status, OutcomeStatus::Failed(_)));
        assert_eq!(report.outcome("Subnet").unwrap().status, OutcomeStatus::Skipped);
        assert!(report.outcome("Cluster").unwrap().is_success());

        assert!(state.get("Vpc").is_none());
        assert!(state.get("Cluster").is_some());
        assert!(state.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_replace_deletes_then_creates() {
        let provider = Arc::new(SandboxProvider::new(Environment::default()));
        let old = template();
        let mut state = StackState::new("test");
        let plan = Planner::new().plan(&old, &state).unwrap();
        executor(provider.clone())
            .apply(&plan, &old, &mut state)
            .await
            .unwrap();
        let old_vpc = state.get("Vpc").unwrap().physical_id.clone();

        let mut new = old.clone();
        new.resources["Vpc"].properties["CidrBlock"] = json!("10.1.0.0/16");
        new.resources["Subnet"].properties["CidrBlock"] = json!("10.1.0.0/24");

        let plan = Planner::new().plan(&new, &state).unwrap();
        let report = executor(provider.clone())
            .apply(&plan, &new, &mut state)
            .await
            .unwrap();

        assert!(report.is_success(), "{:?}", report);
        let new_vpc = &state.get("Vpc").unwrap().physical_id;
        assert_ne!(new_vpc, &old_vpc);
        assert_eq!(provider.resource_count(), 3);
        assert_eq!(&state.outputs["VpcId"], new_vpc);
    }

    #[tokio::test]
    async fn test_replacement_cut_short_reports_failure() {
        let provider = Arc::new(SandboxProvider::new(Environment::default()));
        let old = template();
        let mut state = StackState::new("test");
        let plan = Planner::new().plan(&old, &state).unwrap();
        executor(provider.clone())
            .apply(&plan, &old, &mut state)
            .await
            .unwrap();

        // The old VPC and subnet go away, then the new VPC is rejected
        let mut new = old.clone();
        new.resources["Vpc"].properties["CidrBlock"] = json!("10.1.0.0/33");
        let plan = Planner::new().plan(&new, &state).unwrap();
        let report = executor(provider.clone())
            .apply(&plan, &new, &mut state)
            .await
            .unwrap();

        assert!(matches!(report.outcome("Vpc").unwrap().status, OutcomeStatus::Failed(_)));
        let subnet = report.outcome("Subnet").unwrap();
        assert_eq!(subnet.attempts, 1);
        assert_eq!(
            subnet.status,
            OutcomeStatus::Failed("deleted; recreation skipped because Vpc failed".into())
        );
        assert!(report.skipped().is_empty());
        assert!(state.get("Subnet").is_none());
        assert_eq!(provider.resources_of_type(types::SUBNET).len(), 0);
    }

    #[tokio::test]
    async fn test_destroy_empties_state() {
        let provider = Arc::new(SandboxProvider::new(Environment::default()));
        let template = template();
        let mut state = StackState::new("test");
        let plan = Planner::new().plan(&template, &state).unwrap();
        let executor = executor(provider.clone());
        executor.apply(&plan, &template, &mut state).await.unwrap();

        let plan = Planner::new().plan_destroy(&state).unwrap();
        let report = executor
            .apply(&plan, &Template::default(), &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(state.is_empty());
        assert!(state.outputs.is_empty());
        assert_eq!(provider.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_succeeds() {
        let provider = Arc::new(SandboxProvider::new(Environment::default()));
        let mut state = StackState::new("test");
        state.record(DeployedResource::new("Cluster", types::CLUSTER, "ghost"));

        let plan = Planner::new().plan_destroy(&state).unwrap();
        let report = executor(provider)
            .apply(&plan, &Template::default(), &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(state.is_empty());
    }
}
