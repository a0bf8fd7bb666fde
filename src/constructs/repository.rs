//! Container image repository construct.
//!
//! Declares an image repository with optional vulnerability scanning on push,
//! lifecycle (retention) rules and a teardown policy. With
//! `auto_delete_images` the repository also renders a companion resource that
//! purges the stored images before the repository itself is deleted, so a
//! destroy never fails on a non-empty repository.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{logical_id, types, Construct};
use crate::error::{Error, Result};
use crate::stack::Environment;
use crate::template::{get_att, reference, DeletionPolicy, TemplateResource};

static REPOSITORY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9]+(?:[._-][a-z0-9]+)*/)*[a-z0-9]+(?:[._-][a-z0-9]+)*$")
        .unwrap_or_else(|e| panic!("invalid repository name pattern: {}", e))
});

/// What happens to the repository when it is removed from the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemovalPolicy {
    /// Delete the repository on teardown.
    Destroy,
    /// Keep the repository and its images on teardown.
    #[default]
    Retain,
}

impl From<RemovalPolicy> for DeletionPolicy {
    fn from(policy: RemovalPolicy) -> Self {
        match policy {
            RemovalPolicy::Destroy => DeletionPolicy::Delete,
            RemovalPolicy::Retain => DeletionPolicy::Retain,
        }
    }
}

/// Which images a lifecycle rule selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagStatus {
    /// Tagged and untagged images alike
    Any,
    /// Images with a tag matching the prefix list
    Tagged,
    /// Images without tags
    Untagged,
}

/// Whether tags can be overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageTagMutability {
    /// Tags may be moved to a new image
    #[default]
    Mutable,
    /// Tags are fixed once pushed
    Immutable,
}

/// A retention rule.
///
/// Exactly one of `max_image_count` or `max_image_age_days` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRule {
    /// Human readable description
    pub description: Option<String>,
    /// Evaluation order; lower runs first. Assigned automatically when omitted.
    pub rule_priority: Option<u32>,
    /// Image selection; defaults to `Tagged` with a prefix list, `Any` otherwise
    pub tag_status: Option<TagStatus>,
    /// Tag prefixes, only valid with `Tagged`
    pub tag_prefix_list: Vec<String>,
    /// Keep at most this many images
    pub max_image_count: Option<u32>,
    /// Expire images older than this many days
    pub max_image_age_days: Option<u32>,
}

impl LifecycleRule {
    /// Rule that keeps the newest `count` images.
    pub fn keep_last(count: u32) -> Self {
        Self {
            max_image_count: Some(count),
            ..Self::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set an explicit priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.rule_priority = Some(priority);
        self
    }

    /// Set the tag status.
    pub fn with_tag_status(mut self, status: TagStatus) -> Self {
        self.tag_status = Some(status);
        self
    }

    /// The tag status after applying the default.
    pub fn effective_tag_status(&self) -> TagStatus {
        self.tag_status.unwrap_or(if self.tag_prefix_list.is_empty() {
            TagStatus::Any
        } else {
            TagStatus::Tagged
        })
    }

    fn validate(&self, construct: &str) -> Result<()> {
        match (self.max_image_count, self.max_image_age_days) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(Error::validation(
                    construct,
                    "a lifecycle rule needs exactly one of max_image_count or max_image_age_days",
                ))
            }
            (Some(0), _) | (_, Some(0)) => {
                return Err(Error::validation(
                    construct,
                    "lifecycle rule limits must be greater than zero",
                ))
            }
            _ => {}
        }

        match self.effective_tag_status() {
            TagStatus::Tagged if self.tag_prefix_list.is_empty() => Err(Error::validation(
                construct,
                "a Tagged lifecycle rule needs a tag prefix list",
            )),
            TagStatus::Any | TagStatus::Untagged if !self.tag_prefix_list.is_empty() => {
                Err(Error::validation(
                    construct,
                    "a tag prefix list is only valid on Tagged lifecycle rules",
                ))
            }
            _ => Ok(()),
        }
    }

    fn render(&self, priority: u32) -> Value {
        let mut selection = json!({ "tagStatus": self.effective_tag_status() });
        if !self.tag_prefix_list.is_empty() {
            selection["tagPrefixList"] = json!(self.tag_prefix_list);
        }
        if let Some(count) = self.max_image_count {
            selection["countType"] = json!("imageCountMoreThan");
            selection["countNumber"] = json!(count);
        } else if let Some(days) = self.max_image_age_days {
            selection["countType"] = json!("sinceImagePushed");
            selection["countUnit"] = json!("days");
            selection["countNumber"] = json!(days);
        }

        let mut rule = json!({
            "rulePriority": priority,
            "selection": selection,
            "action": { "type": "expire" },
        });
        if let Some(ref description) = self.description {
            rule["description"] = json!(description);
        }
        rule
    }
}

/// Repository configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryProps {
    /// Repository name
    pub repository_name: String,
    /// Scan images for vulnerabilities when they are pushed
    pub image_scan_on_push: bool,
    /// Tag mutability
    pub image_tag_mutability: ImageTagMutability,
    /// Retention rules
    pub lifecycle_rules: Vec<LifecycleRule>,
    /// Teardown behaviour
    pub removal_policy: RemovalPolicy,
    /// Purge images before deleting the repository (requires `Destroy`)
    pub auto_delete_images: bool,
}

/// Image repository construct.
#[derive(Debug, Clone)]
pub struct Repository {
    id: String,
    props: RepositoryProps,
}

impl Repository {
    /// Declare a repository.
    pub fn new(id: impl Into<String>, props: RepositoryProps) -> Self {
        Self {
            id: id.into(),
            props,
        }
    }

    /// The configuration.
    pub fn props(&self) -> &RepositoryProps {
        &self.props
    }

    /// `Ref` to the repository name.
    pub fn repository_name(&self) -> Value {
        reference(&self.id)
    }

    /// The registry address images are pushed to.
    pub fn repository_uri(&self) -> Value {
        get_att(&self.id, "RepositoryUri")
    }

    /// The repository ARN.
    pub fn repository_arn(&self) -> Value {
        get_att(&self.id, "Arn")
    }

    /// Logical id of the auto-delete companion resource.
    pub fn auto_delete_id(&self) -> String {
        logical_id(&[self.id.as_str(), "AutoDeleteImagesCustomResource"])
    }

    /// Priorities in rule order: explicit ones kept, the rest numbered after
    /// the highest explicit priority, with `Any` rules always placed last.
    pub fn rule_priorities(&self) -> Vec<u32> {
        let rules = &self.props.lifecycle_rules;
        let mut next = rules
            .iter()
            .filter_map(|r| r.rule_priority)
            .max()
            .unwrap_or(0)
            + 1;
        let mut priorities: Vec<Option<u32>> = rules.iter().map(|r| r.rule_priority).collect();

        for pass_any in [false, true] {
            for (slot, rule) in priorities.iter_mut().zip(rules) {
                let is_any = rule.effective_tag_status() == TagStatus::Any;
                if slot.is_none() && is_any == pass_any {
                    *slot = Some(next);
                    next += 1;
                }
            }
        }

        priorities.into_iter().flatten().collect()
    }

    /// The lifecycle policy document, if any rules are declared.
    pub fn lifecycle_policy_text(&self) -> Option<String> {
        if self.props.lifecycle_rules.is_empty() {
            return None;
        }

        let mut rules: Vec<(u32, &LifecycleRule)> = self
            .rule_priorities()
            .into_iter()
            .zip(&self.props.lifecycle_rules)
            .collect();
        rules.sort_by_key(|(priority, _)| *priority);

        let rendered: Vec<Value> = rules.iter().map(|(p, r)| r.render(*p)).collect();
        Some(json!({ "rules": rendered }).to_string())
    }
}

impl Construct for Repository {
    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self, _env: &Environment) -> Result<()> {
        let props = &self.props;
        let name = &props.repository_name;

        if name.len() < 2 || name.len() > 256 {
            return Err(Error::validation(
                &self.id,
                format!("repository name '{}' must be 2 to 256 characters", name),
            ));
        }
        if !REPOSITORY_NAME.is_match(name) {
            return Err(Error::validation(
                &self.id,
                format!(
                    "repository name '{}' must be lowercase letters, digits and separators (. _ - /)",
                    name
                ),
            ));
        }
        if props.auto_delete_images && props.removal_policy != RemovalPolicy::Destroy {
            return Err(Error::validation(
                &self.id,
                "auto_delete_images requires removal_policy Destroy",
            ));
        }

        for rule in &props.lifecycle_rules {
            rule.validate(&self.id)?;
        }

        let priorities = self.rule_priorities();
        let mut unique = priorities.clone();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != priorities.len() {
            return Err(Error::validation(
                &self.id,
                "lifecycle rule priorities must be unique",
            ));
        }

        let highest = priorities.iter().copied().max().unwrap_or(0);
        for (rule, priority) in props.lifecycle_rules.iter().zip(&priorities) {
            if rule.effective_tag_status() == TagStatus::Any && *priority != highest {
                return Err(Error::validation(
                    &self.id,
                    "a lifecycle rule with tag status Any must have the highest priority",
                ));
            }
        }

        Ok(())
    }

    fn render(&self, _env: &Environment) -> Result<IndexMap<String, TemplateResource>> {
        let props = &self.props;
        let mut properties = json!({
            "RepositoryName": props.repository_name,
            "ImageScanningConfiguration": { "ScanOnPush": props.image_scan_on_push },
            "ImageTagMutability": props.image_tag_mutability,
        });
        if let Some(text) = self.lifecycle_policy_text() {
            properties["LifecyclePolicy"] = json!({ "LifecyclePolicyText": text });
        }

        let mut resources = IndexMap::new();
        resources.insert(
            self.id.clone(),
            TemplateResource::new(types::REPOSITORY, properties)
                .with_deletion_policy(props.removal_policy.into()),
        );

        if props.auto_delete_images {
            resources.insert(
                self.auto_delete_id(),
                TemplateResource::new(
                    types::AUTO_DELETE_IMAGES,
                    json!({ "RepositoryName": self.repository_name() }),
                ),
            );
        }

        Ok(resources)
    }
}
