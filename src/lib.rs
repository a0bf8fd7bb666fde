//! # Stackform - Declarative Infrastructure for the Health Visualization Stack
//!
//! Stackform declares a small cloud deployment as typed constructs, synthesizes
//! it into a provider-neutral template, diffs that template against recorded
//! state and applies the resulting change-set in dependency order with
//! bounded parallelism and retries.
//!
//! ## Core Concepts
//!
//! - **Constructs**: Typed building blocks (network, repository, cluster, output)
//!   that each expand into one or more template resources
//! - **Stack**: The deployment unit binding constructs to an account and region
//! - **Template**: The synthesized resource and output declarations
//! - **State**: What was actually deployed, with physical ids and attributes
//! - **Plan**: The change-set between a template and recorded state
//! - **Provider**: The control plane resources are created in
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  Stack + Constructs ──► Template                     │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │ Resource Graph  │   │      Planner        │   │    State Store      │
//! │   (petgraph)    │   │  (template vs state)│   │   (JSON files)      │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                Executor (waves, retries, skip-on-failure)            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Provider                                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stackform::prelude::*;
//!
//! # async fn run() -> stackform::Result<()> {
//! let stack = health_viz_stack(StackProps::default())?;
//! let template = stack.synthesize()?;
//!
//! let mut state = StackState::new(stack.name());
//! let change_set = Planner::new().plan(&template, &state)?;
//!
//! let provider = Arc::new(SandboxProvider::new(stack.env().clone()));
//! let executor = Executor::new(provider, RetryPolicy::default());
//! let report = executor.apply(&change_set, &template, &mut state).await?;
//! report.ensure_success()?;
//!
//! println!("{:?}", state.outputs);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, Result};

    // Declaration
    pub use crate::app::{health_viz_stack, StackProps};
    pub use crate::cidr::Ipv4Cidr;
    pub use crate::constructs::{
        Cluster, ClusterProps, Network, NetworkProps, Output, SubnetConfiguration, SubnetType,
    };
    pub use crate::stack::{Environment, Stack};
    pub use crate::template::{DeletionPolicy, Reference, Template, TemplateResource};

    // Planning and execution
    pub use crate::executor::{ApplyReport, Executor};
    pub use crate::graph::ResourceGraph;
    pub use crate::plan::{Action, ChangeSet, Planner};
    pub use crate::retry::RetryPolicy;

    // Providers and state
    pub use crate::provider::{Provider, ProviderError, SandboxProvider};
    pub use crate::state::{JsonPersistence, StackState, StatePersistence};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for Stackform operations.
pub mod error;

/// IPv4 CIDR arithmetic and subnet carving.
pub mod cidr;

/// Synthesized template model and intrinsic references.
///
/// A [`Template`](template::Template) is the provider-neutral form of a stack:
/// logical ids mapped to typed resources, plus named outputs. Properties
/// may contain `Ref` and `Fn::GetAtt` references to other resources.
pub mod template;

// ============================================================================
// Declaration
// ============================================================================

/// Typed constructs that expand into template resources.
pub mod constructs;

/// Stacks and deployment environments.
pub mod stack;

/// The health data visualization stack definition.
pub mod app;

// ============================================================================
// Planning and Execution
// ============================================================================

/// Dependency graph over template or state resources.
///
/// Built on petgraph. Provides topological levels used to group
/// independent resources into concurrent waves.
pub mod graph;

/// Change-set computation between a template and recorded state.
pub mod plan;

/// Change-set execution against a provider.
///
/// # Example
///
/// ```rust,ignore
/// use stackform::executor::Executor;
///
/// let executor = Executor::new(provider, RetryPolicy::default()).with_parallelism(8);
/// let report = executor.apply(&change_set, &template, &mut state).await?;
/// ```
pub mod executor;

/// Retry policies with backoff and jitter.
pub mod retry;

// ============================================================================
// Providers and State
// ============================================================================

/// Control plane abstraction and the sandbox implementation.
pub mod provider;

/// Deployed-resource state and its persistence.
pub mod state;

pub use error::{Error, Result};
