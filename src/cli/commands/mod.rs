//! Subcommands module for Stackform CLI
//!
//! This module contains all the subcommand implementations.

pub mod deploy;
pub mod inspect;
pub mod plan;

use crate::cli::output::OutputFormatter;
use crate::config::Config;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use stackform::app::{health_viz_stack, StackProps};
use stackform::executor::Executor;
use stackform::provider::SandboxProvider;
use stackform::stack::{Environment, Stack};
use stackform::state::{PersistenceBackend, StackState, StatePersistence};
use stackform::template::Template;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Verbosity level
    pub verbosity: u8,
    /// Deployment target
    pub env: Environment,
    /// Directory holding stack state
    pub state_dir: PathBuf,
    /// Concurrent provider calls per wave
    pub parallelism: usize,
}

impl CommandContext {
    /// Create a new command context from CLI arguments; flags win over config
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let use_color = !cli.no_color && config.colors.enabled;
        let output = OutputFormatter::new(use_color, cli.is_json(), cli.verbosity());

        let env = Environment::new(
            cli.account
                .clone()
                .unwrap_or_else(|| config.defaults.account.clone()),
            cli.region
                .clone()
                .unwrap_or_else(|| config.defaults.region.clone()),
        );
        let state_dir = cli
            .state_dir
            .clone()
            .unwrap_or_else(|| config.defaults.state_dir.clone());
        let parallelism = config.defaults.parallelism.max(1);

        Self {
            config,
            output,
            verbosity: cli.verbosity(),
            env,
            state_dir,
            parallelism,
        }
    }

    /// Declare the stack for the current environment
    pub fn stack(&self) -> Result<Stack> {
        health_viz_stack(StackProps {
            env: self.env.clone(),
            ..StackProps::default()
        })
        .context("Failed to declare stack")
    }

    /// Declare and synthesize the stack
    pub fn synthesize(&self) -> Result<(Stack, Template)> {
        let stack = self.stack()?;
        let template = stack.synthesize().context("Stack synthesis failed")?;
        Ok((stack, template))
    }

    /// Open the state store
    pub fn persistence(&self) -> Result<Arc<dyn StatePersistence>> {
        PersistenceBackend::Json(self.state_dir.clone())
            .open()
            .with_context(|| format!("Cannot open state directory {}", self.state_dir.display()))
    }

    /// Path of the sandbox control plane for the current environment
    pub fn sandbox_path(&self) -> PathBuf {
        self.state_dir
            .join("sandbox")
            .join(format!("{}-{}.json", self.env.account, self.env.region))
    }

    /// Build an executor against the sandbox provider
    pub fn executor(&self) -> Result<Executor> {
        let path = self.sandbox_path();
        self.output
            .info(&format!("Using sandbox control plane at {}", path.display()));

        let provider = SandboxProvider::with_state_file(self.env.clone(), &path)
            .with_context(|| format!("Cannot open sandbox {}", path.display()))?;

        Ok(Executor::new(Arc::new(provider), self.config.retry.policy())
            .with_parallelism(self.parallelism))
    }

    /// Load recorded state for a stack, or start empty
    pub fn load_state(&self, stack: &str) -> Result<StackState> {
        self.persistence()?
            .load_or_new(stack)
            .with_context(|| format!("Cannot load state for stack {}", stack))
    }
}
