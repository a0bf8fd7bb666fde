//! Named stack outputs.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::template::TemplateOutput;

/// A value exported by the stack after deployment.
///
/// The value is either a literal or a `Ref`/`Fn::GetAtt` object that is
/// resolved against deployed state.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    name: String,
    value: Value,
    description: Option<String>,
    export_name: Option<String>,
}

impl Output {
    /// Declare an output.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
            export_name: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set a cross-stack export name.
    pub fn with_export_name(mut self, export_name: impl Into<String>) -> Self {
        self.export_name = Some(export_name.into());
        self
    }

    /// The output name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output names must be non-empty and alphanumeric.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::validation(
                &self.name,
                "output names must be non-empty and alphanumeric",
            ));
        }
        if self.value.is_null() {
            return Err(Error::validation(&self.name, "output value is empty"));
        }
        Ok(())
    }

    /// Render into the template representation.
    pub fn render(&self) -> TemplateOutput {
        TemplateOutput {
            value: self.value.clone(),
            description: self.description.clone(),
            export_name: self.export_name.clone(),
        }
    }
}
