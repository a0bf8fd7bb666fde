//! The rendered declaration of a stack.
//!
//! A [`Template`] is what a [`Stack`](crate::stack::Stack) synthesizes to: a
//! flat map of resources keyed by logical id plus a map of outputs. Resource
//! properties are plain JSON; cross-resource references are encoded as
//! `{"Ref": "<id>"}` or `{"Fn::GetAtt": ["<id>", "<attribute>"]}` objects and
//! become dependency edges in the [`ResourceGraph`](crate::graph::ResourceGraph).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

/// What happens to a resource's underlying data when it leaves the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionPolicy {
    /// Delete the resource from the provider.
    #[default]
    Delete,
    /// Forget the resource but leave it in the provider.
    Retain,
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionPolicy::Delete => write!(f, "Delete"),
            DeletionPolicy::Retain => write!(f, "Retain"),
        }
    }
}

/// A single resource in a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    /// Provider type name, e.g. `AWS::EC2::VPC`
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Desired properties
    #[serde(default)]
    pub properties: Value,
    /// Explicit dependencies (logical ids)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Teardown behaviour
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

impl TemplateResource {
    /// Create a resource with the given type and properties.
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: DeletionPolicy::Delete,
        }
    }

    /// Add an explicit dependency.
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let id = logical_id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Set the deletion policy.
    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    /// All logical ids this resource needs to exist first.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = self.depends_on.clone();
        for reference in collect_references(&self.properties) {
            let target = reference.target().to_string();
            if !deps.contains(&target) {
                deps.push(target);
            }
        }
        deps
    }
}

/// A named export of the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateOutput {
    /// Literal or reference value
    pub value: Value,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional cross-stack export name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
}

/// A fully synthesized stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    /// Template description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Resources keyed by logical id, in declaration order
    #[serde(default)]
    pub resources: IndexMap<String, TemplateResource>,
    /// Outputs keyed by name
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, TemplateOutput>,
}

impl Template {
    /// Look up a resource by logical id.
    pub fn resource(&self, logical_id: &str) -> Option<&TemplateResource> {
        self.resources.get(logical_id)
    }

    /// Logical ids of every resource with the given type.
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse a JSON template.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// A reference from one template value to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// The resource's physical id
    Ref(String),
    /// A named attribute of the resource
    GetAtt(String, String),
}

impl Reference {
    /// The referenced logical id.
    pub fn target(&self) -> &str {
        match self {
            Reference::Ref(id) | Reference::GetAtt(id, _) => id,
        }
    }

    /// Parse a reference object, if `value` is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        if let Some(id) = obj.get("Ref").and_then(Value::as_str) {
            return Some(Reference::Ref(id.to_string()));
        }
        let parts = obj.get("Fn::GetAtt")?.as_array()?;
        match parts.as_slice() {
            [id, attr] => Some(Reference::GetAtt(
                id.as_str()?.to_string(),
                attr.as_str()?.to_string(),
            )),
            _ => None,
        }
    }
}

/// `{"Ref": id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// Walk a value and collect every reference it contains.
pub fn collect_references(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    walk(value, &mut found);
    found
}

fn walk(value: &Value, found: &mut Vec<Reference>) {
    if let Some(reference) = Reference::from_value(value) {
        if !found.contains(&reference) {
            found.push(reference);
        }
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| walk(v, found)),
        Value::Object(map) => map.values().for_each(|v| walk(v, found)),
        _ => {}
    }
}
