//! Deployed stack state.
//!
//! A [`StackState`] records what the executor actually created: for every
//! logical id the physical id the provider assigned, the properties that were
//! applied, and the attributes the provider reported back. The planner diffs
//! templates against it and the executor resolves `Ref`/`Fn::GetAtt`
//! references from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   plan    ┌──────────┐   apply   ┌────────────┐
//! │   Template   │ ───────▶  │ ChangeSet│ ───────▶  │  Provider  │
//! └──────────────┘           └──────────┘           └────────────┘
//!         ▲                        ▲                      │
//!         │ diff                   │                      │ records
//!         │                  ┌─────┴──────┐               ▼
//!         └───────────────── │ StackState │ ◀──── physical ids,
//!                            └────────────┘       attributes
//!                                  │
//!                                  ▼
//!                        StatePersistence (JSON / memory)
//! ```

pub mod persistence;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::template::{DeletionPolicy, Reference, Template};

pub use persistence::{JsonPersistence, MemoryPersistence, PersistenceBackend, StatePersistence};

/// A resource as it exists in the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedResource {
    /// Logical id in the template
    pub logical_id: String,
    /// Resource type
    pub resource_type: String,
    /// Provider-assigned identifier
    pub physical_id: String,
    /// Desired properties as declared when last applied (references unresolved)
    pub properties: Value,
    /// Attributes reported by the provider
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Teardown behaviour
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    /// Logical ids this resource depended on when applied
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// When the resource was created
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed
    pub updated_at: DateTime<Utc>,
}

impl DeployedResource {
    /// Record a freshly created resource.
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        physical_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            physical_id: physical_id.into(),
            properties: Value::Object(Default::default()),
            attributes: BTreeMap::new(),
            deletion_policy: DeletionPolicy::Delete,
            depends_on: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the applied properties.
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Set the provider attributes.
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the dependencies.
    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Set the deletion policy.
    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    /// Value of a reference to this resource.
    pub fn resolve(&self, reference: &Reference) -> Option<String> {
        match reference {
            Reference::Ref(_) => Some(self.physical_id.clone()),
            Reference::GetAtt(_, attribute) => self.attributes.get(attribute).cloned(),
        }
    }
}

/// Everything deployed for one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    /// Stack name
    pub stack: String,
    /// Incremented on every apply
    pub serial: u64,
    /// Identifies this state's history; survives serial bumps
    pub lineage: String,
    /// Last write
    pub updated_at: DateTime<Utc>,
    /// Deployed resources keyed by logical id
    #[serde(default)]
    pub resources: IndexMap<String, DeployedResource>,
    /// Resolved outputs
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

impl StackState {
    /// Empty state for a stack that has never been deployed.
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            serial: 0,
            lineage: Uuid::new_v4().to_string(),
            updated_at: Utc::now(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Whether nothing is deployed.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Look up a deployed resource.
    pub fn get(&self, logical_id: &str) -> Option<&DeployedResource> {
        self.resources.get(logical_id)
    }

    /// Record a resource, replacing any previous record.
    pub fn record(&mut self, resource: DeployedResource) {
        self.resources.insert(resource.logical_id.clone(), resource);
    }

    /// Forget a resource.
    pub fn remove(&mut self, logical_id: &str) -> Option<DeployedResource> {
        self.resources.shift_remove(logical_id)
    }

    /// Mark a completed apply.
    pub fn bump(&mut self) {
        self.serial += 1;
        self.updated_at = Utc::now();
    }

    /// Resolve a single reference.
    pub fn resolve_reference(&self, reference: &Reference) -> Result<String> {
        let attribute = match reference {
            Reference::Ref(_) => "Ref",
            Reference::GetAtt(_, attribute) => attribute.as_str(),
        };
        self.get(reference.target())
            .and_then(|r| r.resolve(reference))
            .ok_or_else(|| Error::Unresolved {
                logical_id: reference.target().to_string(),
                attribute: attribute.to_string(),
            })
    }

    /// Replace every reference inside `value` with its deployed value.
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        if let Some(reference) = Reference::from_value(value) {
            return Ok(Value::String(self.resolve_reference(&reference)?));
        }
        Ok(match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Resolve the template's outputs into strings.
    pub fn resolve_outputs(&self, template: &Template) -> Result<IndexMap<String, String>> {
        template
            .outputs
            .iter()
            .map(|(name, output)| {
                let value = match self.resolve_value(&output.value)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok((name.clone(), value))
            })
            .collect()
    }
}
