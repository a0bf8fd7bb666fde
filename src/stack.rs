//! Stacks and deployment environments.
//!
//! A [`Stack`] is a named collection of constructs and outputs bound to an
//! [`Environment`]. [`Stack::synthesize`] validates every construct, renders
//! the resources into a single [`Template`] and checks the resulting graph
//! for dangling references and cycles.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constructs::{Construct, Output};
use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::template::Template;

static ACCOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{12}$").unwrap_or_else(|e| panic!("invalid account pattern: {}", e))
});

static REGION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]{2}(-[a-z]+)+-[0-9]$")
        .unwrap_or_else(|e| panic!("invalid region pattern: {}", e))
});

/// Default account used when none is configured.
pub const DEFAULT_ACCOUNT: &str = "123456789012";

/// Default region used when none is configured.
pub const DEFAULT_REGION: &str = "ca-central-1";

/// Availability zones a region exposes.
pub const MAX_AVAILABILITY_ZONES: usize = 6;

/// Where a stack is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    /// 12-digit account id
    pub account: String,
    /// Region name, e.g. `ca-central-1`
    pub region: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT, DEFAULT_REGION)
    }
}

impl Environment {
    /// Create an environment.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }

    /// Check the account and region formats.
    pub fn validate(&self) -> Result<()> {
        if !ACCOUNT.is_match(&self.account) {
            return Err(Error::validation(
                "environment",
                format!("account '{}' must be 12 digits", self.account),
            ));
        }
        if !REGION.is_match(&self.region) {
            return Err(Error::validation(
                "environment",
                format!("'{}' is not a region name", self.region),
            ));
        }
        Ok(())
    }

    /// The first `count` availability zones of the region (`<region>a`, `<region>b`, ...).
    ///
    /// At most [`MAX_AVAILABILITY_ZONES`] are returned.
    pub fn availability_zones(&self, count: usize) -> Vec<String> {
        ('a'..='z')
            .take(count.min(MAX_AVAILABILITY_ZONES))
            .map(|suffix| format!("{}{}", self.region, suffix))
            .collect()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

/// A deployable collection of constructs.
#[derive(Debug)]
pub struct Stack {
    name: String,
    env: Environment,
    description: Option<String>,
    constructs: Vec<Box<dyn Construct>>,
    outputs: Vec<Output>,
}

impl Stack {
    /// Create an empty stack.
    pub fn new(name: impl Into<String>, env: Environment) -> Self {
        Self {
            name: name.into(),
            env,
            description: None,
            constructs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Set the template description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stack name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deployment environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Declared constructs, in declaration order.
    pub fn constructs(&self) -> impl Iterator<Item = &dyn Construct> {
        self.constructs.iter().map(|c| c.as_ref())
    }

    /// Declared outputs.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Add a construct. Ids must be unique within the stack.
    pub fn add<C: Construct + 'static>(&mut self, construct: C) -> Result<()> {
        if self.constructs.iter().any(|c| c.id() == construct.id()) {
            return Err(Error::DuplicateId(construct.id().to_string()));
        }
        self.constructs.push(Box::new(construct));
        Ok(())
    }

    /// Add an output. Names must be unique within the stack.
    pub fn add_output(&mut self, output: Output) -> Result<()> {
        if self.outputs.iter().any(|o| o.name() == output.name()) {
            return Err(Error::DuplicateId(output.name().to_string()));
        }
        self.outputs.push(output);
        Ok(())
    }

    /// Validate and render the stack into a template.
    pub fn synthesize(&self) -> Result<Template> {
        self.env.validate()?;

        let mut template = Template {
            description: self.description.clone(),
            ..Template::default()
        };

        for construct in &self.constructs {
            construct.validate(&self.env)?;
            for (logical_id, resource) in construct.render(&self.env)? {
                if template.resources.contains_key(&logical_id) {
                    return Err(Error::DuplicateId(logical_id));
                }
                template.resources.insert(logical_id, resource);
            }
            debug!(construct = construct.id(), "Synthesized construct");
        }

        let mut names = HashSet::new();
        for output in &self.outputs {
            output.validate()?;
            if !names.insert(output.name()) {
                return Err(Error::DuplicateId(output.name().to_string()));
            }
            template
                .outputs
                .insert(output.name().to_string(), output.render());
        }

        // Reject dangling references and cycles before anything is planned
        ResourceGraph::from_template(&template)?;

        info!(
            stack = %self.name,
            resources = template.resources.len(),
            outputs = template.outputs.len(),
            "Synthesized stack"
        );
        Ok(template)
    }
}
