//! Change-set planning.
//!
//! The [`Planner`] compares a synthesized [`Template`] with the deployed
//! [`StackState`] and produces a [`ChangeSet`]: one [`Change`] per resource,
//! ordered so that removals run first (dependents before their dependencies,
//! using the graph of what is deployed) followed by creations and updates in
//! dependency order of the new template.
//!
//! Changing an immutable property forces a replacement. Replacements cascade:
//! a resource with any property referencing a replaced resource is replaced
//! as well, so teardown never removes something a surviving resource still
//! points at.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use crate::constructs::types;
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::state::StackState;
use crate::template::{collect_references, DeletionPolicy, Template, TemplateResource};

/// What will happen to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new resource
    Create,
    /// Change mutable properties in place
    Update,
    /// Delete and recreate
    Replace,
    /// Delete from the provider
    Delete,
    /// Forget without deleting (retained resources)
    Orphan,
    /// Nothing to do
    NoChange,
}

impl Action {
    /// Marker used in plan listings.
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "-/+",
            Action::Delete => "-",
            Action::Orphan => "?",
            Action::NoChange => " ",
        }
    }

    /// Whether the action removes the resource from the stack.
    pub fn is_removal(&self) -> bool {
        matches!(self, Action::Delete | Action::Orphan)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Delete => "delete",
            Action::Orphan => "orphan",
            Action::NoChange => "no-op",
        };
        write!(f, "{}", s)
    }
}

/// A single property difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Top-level property name
    pub path: String,
    /// Deployed value
    pub before: Option<Value>,
    /// Desired value
    pub after: Option<Value>,
    /// Changing this property forces replacement
    pub requires_replacement: bool,
}

/// A planned change to one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Logical id
    pub logical_id: String,
    /// Resource type (desired type for creations, deployed type otherwise)
    pub resource_type: String,
    /// What will happen
    pub action: Action,
    /// Current physical id, if deployed
    pub physical_id: Option<String>,
    /// Why the action was chosen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Property-level differences
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub property_changes: Vec<PropertyChange>,
}

impl Change {
    fn new(logical_id: &str, resource_type: &str, action: Action) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            action,
            physical_id: None,
            reason: None,
            property_changes: Vec::new(),
        }
    }

    /// Line diff of the changed properties, `-`/`+` prefixed.
    pub fn diff_text(&self) -> String {
        let mut output = String::new();
        for change in &self.property_changes {
            let before = change
                .before
                .as_ref()
                .map(pretty)
                .unwrap_or_default();
            let after = change.after.as_ref().map(pretty).unwrap_or_default();

            let marker = if change.requires_replacement {
                " (forces replacement)"
            } else {
                ""
            };
            output.push_str(&format!("{}:{}\n", change.path, marker));

            let text_diff = TextDiff::from_lines(&before, &after);
            for line in text_diff.iter_all_changes() {
                let sign = match line.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                output.push_str(&format!("  {}{}\n", sign, line.value().trim_end()));
            }
        }
        output
    }
}

fn pretty(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}

/// Counts per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Resources to create
    pub create: usize,
    /// Resources to update in place
    pub update: usize,
    /// Resources to replace
    pub replace: usize,
    /// Resources to delete
    pub delete: usize,
    /// Resources to forget
    pub orphan: usize,
    /// Resources left alone
    pub unchanged: usize,
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} to orphan",
            self.create, self.update, self.replace, self.delete, self.orphan
        )
    }
}

/// Ordered list of changes for one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Stack name
    pub stack: String,
    /// Changes in execution order
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// Counts per action.
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.changes {
            match change.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::Orphan => summary.orphan += 1,
                Action::NoChange => summary.unchanged += 1,
            }
        }
        summary
    }

    /// True when applying would do nothing.
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(|c| c.action == Action::NoChange)
    }

    /// Changes that do something.
    pub fn actionable(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.action != Action::NoChange)
    }

    /// Look up the change for a logical id.
    pub fn get(&self, logical_id: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.logical_id == logical_id)
    }
}

/// Properties that cannot change without replacing the resource.
pub fn immutable_properties(resource_type: &str) -> &'static [&'static str] {
    match resource_type {
        types::VPC => &["CidrBlock"],
        types::SUBNET => &["CidrBlock", "AvailabilityZone", "VpcId"],
        types::ROUTE_TABLE => &["VpcId"],
        types::ROUTE_TABLE_ASSOCIATION => &["RouteTableId", "SubnetId"],
        types::ROUTE => &["RouteTableId", "DestinationCidrBlock"],
        types::GATEWAY_ATTACHMENT => &["VpcId", "InternetGatewayId"],
        types::NAT_GATEWAY => &["SubnetId", "AllocationId"],
        types::REPOSITORY => &["RepositoryName"],
        types::AUTO_DELETE_IMAGES => &["RepositoryName"],
        types::CLUSTER => &["ClusterName"],
        _ => &[],
    }
}

/// Computes change-sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    /// Create a planner.
    pub fn new() -> Self {
        Self
    }

    /// Plan the changes that bring `state` in line with `template`.
    pub fn plan(&self, template: &Template, state: &StackState) -> Result<ChangeSet> {
        let new_graph = ResourceGraph::from_template(template)?;
        let old_graph = ResourceGraph::from_state(state)?;
        let mut changes = Vec::new();

        for logical_id in old_graph.deletion_order() {
            if template.resources.contains_key(&logical_id) {
                continue;
            }
            if let Some(deployed) = state.get(&logical_id) {
                let action = match deployed.deletion_policy {
                    DeletionPolicy::Delete => Action::Delete,
                    DeletionPolicy::Retain => Action::Orphan,
                };
                let mut change = Change::new(&logical_id, &deployed.resource_type, action);
                change.physical_id = Some(deployed.physical_id.clone());
                change.reason = Some("no longer declared".to_string());
                changes.push(change);
            }
        }

        let mut actions: HashMap<String, Action> = HashMap::new();
        for logical_id in new_graph.creation_order() {
            let Some(desired) = template.resource(&logical_id) else {
                continue;
            };
            let change = self.plan_resource(&logical_id, desired, state, &actions);
            actions.insert(logical_id, change.action);
            changes.push(change);
        }

        let change_set = ChangeSet {
            stack: state.stack.clone(),
            changes,
        };
        debug!(stack = %change_set.stack, summary = %change_set.summary(), "Planned changes");
        Ok(change_set)
    }

    fn plan_resource(
        &self,
        logical_id: &str,
        desired: &TemplateResource,
        state: &StackState,
        actions: &HashMap<String, Action>,
    ) -> Change {
        let Some(deployed) = state.get(logical_id) else {
            return Change::new(logical_id, &desired.resource_type, Action::Create);
        };

        let mut change = Change::new(logical_id, &desired.resource_type, Action::NoChange);
        change.physical_id = Some(deployed.physical_id.clone());

        if deployed.resource_type != desired.resource_type {
            change.action = Action::Replace;
            change.reason = Some(format!(
                "type changed from {} to {}",
                deployed.resource_type, desired.resource_type
            ));
            return change;
        }

        let immutable = immutable_properties(&desired.resource_type);
        let empty = serde_json::Map::new();
        let before = deployed.properties.as_object().unwrap_or(&empty);
        let after = desired.properties.as_object().unwrap_or(&empty);

        let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            let old = before.get(key);
            let new = after.get(key);
            // Any reference to a replaced resource forces recreation
            let upstream_replaced = new.is_some_and(|value| {
                collect_references(value)
                    .iter()
                    .any(|r| actions.get(r.target()) == Some(&Action::Replace))
            });
            let requires_replacement = upstream_replaced || immutable.contains(&key.as_str());

            if old != new || upstream_replaced {
                change.property_changes.push(PropertyChange {
                    path: key.clone(),
                    before: old.cloned(),
                    after: new.cloned(),
                    requires_replacement,
                });
            }
        }

        if let Some(cause) = change
            .property_changes
            .iter()
            .find(|p| p.requires_replacement)
        {
            let reason = if immutable.contains(&cause.path.as_str()) {
                "immutable property changed".to_string()
            } else {
                format!("{} references a replaced resource", cause.path)
            };
            change.action = Action::Replace;
            change.reason = Some(reason);
        } else if !change.property_changes.is_empty() {
            change.action = Action::Update;
        } else if deployed.deletion_policy != desired.deletion_policy {
            change.action = Action::Update;
            change.reason = Some(format!(
                "deletion policy changed to {}",
                desired.deletion_policy
            ));
        }

        change
    }

    /// Plan removing everything in `state`.
    pub fn plan_destroy(&self, state: &StackState) -> Result<ChangeSet> {
        let graph = ResourceGraph::from_state(state)?;
        let changes = graph
            .deletion_order()
            .into_iter()
            .filter_map(|logical_id| {
                let deployed = state.get(&logical_id)?;
                let action = match deployed.deletion_policy {
                    DeletionPolicy::Delete => Action::Delete,
                    DeletionPolicy::Retain => Action::Orphan,
                };
                let mut change = Change::new(&logical_id, &deployed.resource_type, action);
                change.physical_id = Some(deployed.physical_id.clone());
                Some(change)
            })
            .collect();

        Ok(ChangeSet {
            stack: state.stack.clone(),
            changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeployedResource;
    use crate::template::reference;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn template() -> Template {
        let mut template = Template::default();
        template.resources.insert(
            "Vpc".into(),
            TemplateResource::new(types::VPC, json!({ "CidrBlock": "10.0.0.0/16" })),
        );
        template.resources.insert(
            "Subnet".into(),
            TemplateResource::new(
                types::SUBNET,
                json!({ "VpcId": reference("Vpc"), "CidrBlock": "10.0.0.0/24", "AvailabilityZone": "ca-central-1a" }),
            ),
        );
        template.resources.insert(
            "Cluster".into(),
            TemplateResource::new(
                types::CLUSTER,
                json!({ "ClusterName": "c1", "ClusterSettings": [] }),
            ),
        );
        template
    }

    /// State as if `template` had been applied.
    fn deployed(template: &Template) -> StackState {
        let mut state = StackState::new("test");
        for (id, resource) in &template.resources {
            state.record(
                DeployedResource::new(id, &resource.resource_type, format!("{}-id", id))
                    .with_properties(resource.properties.clone())
                    .with_depends_on(resource.dependencies())
                    .with_deletion_policy(resource.deletion_policy),
            );
        }
        state
    }

    fn actions(change_set: &ChangeSet) -> Vec<(String, Action)> {
        change_set
            .changes
            .iter()
            .map(|c| (c.logical_id.clone(), c.action))
            .collect()
    }

    #[test]
    fn test_fresh_stack_creates_everything_in_order() {
        let plan = Planner::new()
            .plan(&template(), &StackState::new("test"))
            .unwrap();
        assert_eq!(
            actions(&plan),
            vec![
                ("Vpc".to_string(), Action::Create),
                ("Cluster".to_string(), Action::Create),
                ("Subnet".to_string(), Action::Create),
            ]
        );
        assert_eq!(plan.summary().create, 3);
    }

    #[test]
    fn test_unchanged_stack_is_empty() {
        let template = template();
        let plan = Planner::new().plan(&template, &deployed(&template)).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary().unchanged, 3);
    }

    #[test]
    fn test_mutable_change_is_update() {
        let old = template();
        let mut new = old.clone();
        new.resources["Cluster"].properties["ClusterSettings"] =
            json!([{ "Name": "containerInsights", "Value": "enabled" }]);

        let plan = Planner::new().plan(&new, &deployed(&old)).unwrap();
        let change = plan.get("Cluster").unwrap();
        assert_eq!(change.action, Action::Update);
        assert_eq!(change.property_changes[0].path, "ClusterSettings");
        assert!(change.diff_text().contains("+"));
    }

    #[test]
    fn test_immutable_change_cascades_replacement() {
        let old = template();
        let mut new = old.clone();
        new.resources["Vpc"].properties["CidrBlock"] = json!("10.1.0.0/16");

        let plan = Planner::new().plan(&new, &deployed(&old)).unwrap();
        assert_eq!(plan.get("Vpc").unwrap().action, Action::Replace);
        // The subnet's VpcId will change, and VpcId is immutable
        assert_eq!(plan.get("Subnet").unwrap().action, Action::Replace);
        assert_eq!(plan.get("Cluster").unwrap().action, Action::NoChange);
    }

    #[test]
    fn test_mutable_reference_to_replaced_resource_cascades() {
        let mut old = template();
        old.resources.insert(
            "Route".into(),
            TemplateResource::new(
                types::ROUTE,
                json!({
                    "RouteTableId": "rtb-1",
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "NatGatewayId": reference("Subnet"),
                }),
            ),
        );
        let mut new = old.clone();
        new.resources["Subnet"].properties["CidrBlock"] = json!("10.0.0.0/25");

        let plan = Planner::new().plan(&new, &deployed(&old)).unwrap();
        let route = plan.get("Route").unwrap();
        assert_eq!(route.action, Action::Replace);
        assert_eq!(
            route.reason.as_deref(),
            Some("NatGatewayId references a replaced resource")
        );
        assert_eq!(plan.summary().replace, 2);
    }

    #[test]
    fn test_type_change_is_replace() {
        let old = template();
        let mut new = old.clone();
        new.resources["Cluster"].resource_type = "Custom::Cluster".into();

        let plan = Planner::new().plan(&new, &deployed(&old)).unwrap();
        let change = plan.get("Cluster").unwrap();
        assert_eq!(change.action, Action::Replace);
        assert!(change.reason.as_ref().unwrap().contains("type changed"));
    }

    #[test]
    fn test_removed_resources_delete_first_in_reverse_order() {
        let old = template();
        let mut new = Template::default();
        new.resources
            .insert("Cluster".into(), old.resources["Cluster"].clone());

        let plan = Planner::new().plan(&new, &deployed(&old)).unwrap();
        assert_eq!(
            actions(&plan),
            vec![
                ("Subnet".to_string(), Action::Delete),
                ("Vpc".to_string(), Action::Delete),
                ("Cluster".to_string(), Action::NoChange),
            ]
        );
    }

    #[test]
    fn test_retained_resources_are_orphaned() {
        let mut old = template();
        old.resources["Cluster"].deletion_policy = DeletionPolicy::Retain;

        let plan = Planner::new().plan_destroy(&deployed(&old)).unwrap();
        assert_eq!(plan.get("Cluster").unwrap().action, Action::Orphan);
        assert_eq!(plan.get("Vpc").unwrap().action, Action::Delete);
        assert_eq!(plan.summary().orphan, 1);

        let order: Vec<&str> = plan.changes.iter().map(|c| c.logical_id.as_str()).collect();
        let subnet = order.iter().position(|id| *id == "Subnet").unwrap();
        let vpc = order.iter().position(|id| *id == "Vpc").unwrap();
        assert!(subnet < vpc);
    }

    #[test]
    fn test_deletion_policy_change_is_update() {
        let old = template();
        let mut new = old.clone();
        new.resources["Cluster"].deletion_policy = DeletionPolicy::Retain;

        let plan = Planner::new().plan(&new, &deployed(&old)).unwrap();
        assert_eq!(plan.get("Cluster").unwrap().action, Action::Update);
    }
}
