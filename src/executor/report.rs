//! Results of applying a change-set.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plan::Action;

/// How a single change ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The provider accepted every call
    Succeeded,
    /// A call failed; carries the error message
    Failed(String),
    /// Not attempted because something it depends on failed
    Skipped,
}

/// Outcome of one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOutcome {
    /// Logical id
    pub logical_id: String,
    /// Resource type
    pub resource_type: String,
    /// Planned action
    pub action: Action,
    /// Result
    pub status: OutcomeStatus,
    /// Provider calls made, retries included
    pub attempts: u32,
    /// Physical id after the change, if the resource exists
    pub physical_id: Option<String>,
}

impl ChangeOutcome {
    pub(crate) fn new(logical_id: &str, resource_type: &str, action: Action) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            action,
            status: OutcomeStatus::Succeeded,
            attempts: 0,
            physical_id: None,
        }
    }

    /// Whether the change went through.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Summary of one apply run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// One entry per actionable change, in plan order
    pub outcomes: Vec<ChangeOutcome>,
    /// Wall-clock time of the run
    pub duration: Duration,
}

impl ApplyReport {
    /// Changes that went through.
    pub fn succeeded(&self) -> Vec<&ChangeOutcome> {
        self.outcomes.iter().filter(|o| o.is_success()).collect()
    }

    /// Changes that failed.
    pub fn failed(&self) -> Vec<&ChangeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Failed(_)))
            .collect()
    }

    /// Changes skipped because of an upstream failure.
    pub fn skipped(&self) -> Vec<&ChangeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Skipped)
            .collect()
    }

    /// True when nothing failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ChangeOutcome::is_success)
    }

    /// Look up the outcome for a logical id.
    pub fn outcome(&self, logical_id: &str) -> Option<&ChangeOutcome> {
        self.outcomes.iter().find(|o| o.logical_id == logical_id)
    }

    /// Turn a partial failure into [`Error::ApplyFailed`].
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::ApplyFailed {
                failed: self.failed().len(),
                skipped: self.skipped().len(),
            })
        }
    }
}
