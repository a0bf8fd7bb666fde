//! Provider abstraction.
//!
//! A [`Provider`] is the control plane resources are created in. The
//! executor only ever talks to this trait; properties it passes in have all
//! `Ref`/`Fn::GetAtt` references already resolved to concrete values.
//!
//! | Provider | Description |
//! |----------|-------------|
//! | [`SandboxProvider`] | local simulated control plane, optionally persisted to disk |

pub mod sandbox;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use sandbox::{OperationKind, SandboxOperation, SandboxProvider};

/// Errors reported by a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The request was malformed or violates a provider-side rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The request conflicts with existing resources.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The resource does not exist.
    #[error("{resource_type} '{physical_id}' not found")]
    NotFound {
        /// Resource type
        resource_type: String,
        /// Physical id that was looked up
        physical_id: String,
    },

    /// The provider rejected the call because of its rate limits.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Transient failure inside the provider.
    #[error("Internal provider error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Returns true if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Throttled(_) | ProviderError::Internal(_))
    }

    /// Create a not-found error.
    pub fn not_found(resource_type: impl Into<String>, physical_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            physical_id: physical_id.into(),
        }
    }
}

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A resource as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResource {
    /// Provider-assigned identifier
    pub physical_id: String,
    /// Readable attributes (`Fn::GetAtt` targets)
    pub attributes: BTreeMap<String, String>,
}

/// A control plane that can create, change and remove resources.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logs and reports.
    fn name(&self) -> &str;

    /// Create a resource.
    async fn create(&self, resource_type: &str, properties: &Value) -> ProviderResult<ProviderResource>;

    /// Change the mutable properties of an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        physical_id: &str,
        properties: &Value,
    ) -> ProviderResult<ProviderResource>;

    /// Remove a resource.
    async fn delete(&self, resource_type: &str, physical_id: &str) -> ProviderResult<()>;

    /// Look up a resource, `None` if it does not exist.
    async fn read(
        &self,
        resource_type: &str,
        physical_id: &str,
    ) -> ProviderResult<Option<ProviderResource>>;
}
