//! Error types for Stackform.
//!
//! This module defines the error types used throughout Stackform, providing
//! rich error information for debugging and user feedback.

use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ProviderError;

/// Result type alias for Stackform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Stackform.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Declaration Errors
    // ========================================================================
    /// An address range could not be parsed or is not canonical.
    #[error("Invalid CIDR block '{cidr}': {message}")]
    InvalidCidr {
        /// The offending CIDR text
        cidr: String,
        /// Error message
        message: String,
    },

    /// A construct's configuration violates one of its constraints.
    #[error("Invalid configuration for '{construct}': {message}")]
    Validation {
        /// Logical id of the construct
        construct: String,
        /// Error message
        message: String,
    },

    /// Two constructs or outputs were declared with the same id.
    #[error("Duplicate id '{0}' in stack")]
    DuplicateId(String),

    // ========================================================================
    // Graph Errors
    // ========================================================================
    /// A resource or output references a logical id that does not exist.
    #[error("'{from}' references unknown resource '{target}'")]
    UnknownReference {
        /// Referencing resource or output
        from: String,
        /// Missing logical id
        target: String,
    },

    /// The resource graph contains a cycle.
    #[error("Dependency cycle detected between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A provider call failed.
    #[error("Provider error on '{logical_id}': {source}")]
    Provider {
        /// Logical id of the resource being changed
        logical_id: String,
        /// Underlying provider error
        #[source]
        source: ProviderError,
    },

    /// A reference could not be resolved against deployed state.
    #[error("Cannot resolve {attribute} of '{logical_id}': resource is not deployed")]
    Unresolved {
        /// Logical id being referenced
        logical_id: String,
        /// Attribute requested (`Ref` for the physical id)
        attribute: String,
    },

    /// One or more changes failed during apply.
    #[error("Apply failed: {failed} change(s) failed, {skipped} skipped")]
    ApplyFailed {
        /// Number of failed changes
        failed: usize,
        /// Number of changes skipped because a dependency failed
        skipped: usize,
    },

    // ========================================================================
    // State Errors
    // ========================================================================
    /// State could not be loaded or stored.
    #[error("State error for stack '{stack}': {message}")]
    State {
        /// Stack name
        stack: String,
        /// Error message
        message: String,
    },

    /// State file is present but unreadable.
    #[error("Corrupt state file '{path}': {message}")]
    CorruptState {
        /// Path of the state file
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a validation error for a construct.
    pub fn validation(construct: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            construct: construct.into(),
            message: message.into(),
        }
    }

    /// Create a CIDR error.
    pub fn invalid_cidr(cidr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCidr {
            cidr: cidr.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error was raised before anything touched the provider.
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidCidr { .. }
                | Error::Validation { .. }
                | Error::DuplicateId(_)
                | Error::UnknownReference { .. }
                | Error::DependencyCycle(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = Error::validation("AppVpc", "nat_gateways exceeds max_azs");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for 'AppVpc': nat_gateways exceeds max_azs"
        );
        assert!(err.is_declaration_error());
    }

    #[test]
    fn test_cycle_display() {
        let err = Error::DependencyCycle(vec!["A".into(), "B".into()]);
        assert_eq!(err.to_string(), "Dependency cycle detected between: A, B");
    }

    #[test]
    fn test_apply_failed_is_not_declaration_error() {
        let err = Error::ApplyFailed {
            failed: 1,
            skipped: 2,
        };
        assert!(!err.is_declaration_error());
    }
}
