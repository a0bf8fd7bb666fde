//! CLI module for Stackform
//!
//! This module provides the command-line interface for Stackform,
//! including argument parsing and subcommand handling.

pub mod commands;
pub mod output;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;

/// Stackform - declare, plan and deploy a cloud stack
///
/// Synthesizes the health visualisation stack, diffs it against recorded
/// state and applies the changes to a local sandbox control plane.
#[derive(Parser, Debug, Clone)]
#[command(name = "stackform")]
#[command(author = "Stackform Contributors")]
#[command(version)]
#[command(about = "Declare, plan and deploy a cloud stack", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "STACKFORM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding stack state
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Target account id
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Target region
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Template serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TemplateFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// YAML
    Yaml,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the synthesized template
    Synth(SynthArgs),

    /// Validate the stack and its dependency graph
    Validate,

    /// Print the dependency graph in DOT format
    Graph,

    /// Show the changes a deploy would make
    Plan(commands::plan::PlanArgs),

    /// Plan and apply the stack
    Deploy(commands::deploy::DeployArgs),

    /// Delete every deployed resource
    Destroy(commands::deploy::DestroyArgs),

    /// Print the outputs of the deployed stack
    Outputs,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for synth command
#[derive(Parser, Debug, Clone)]
pub struct SynthArgs {
    /// Template format
    #[arg(long, short = 'f', value_enum, default_value_t = TemplateFormat::Json)]
    pub format: TemplateFormat,
}

/// Arguments for completions command
#[derive(Parser, Debug, Clone)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }

    /// Write a completion script for `shell`
    pub fn write_completions(shell: clap_complete::Shell, out: &mut dyn Write) {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["stackform", "synth"]).unwrap();
        assert!(matches!(cli.command, Commands::Synth(ref a) if a.format == TemplateFormat::Json));

        let cli = Cli::try_parse_from(["stackform", "synth", "--format", "yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Synth(ref a) if a.format == TemplateFormat::Yaml));
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["stackform", "-vvvv", "plan"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stackform",
            "deploy",
            "--yes",
            "--region",
            "us-east-1",
            "--output",
            "json",
            "--state-dir",
            "/tmp/state",
        ])
        .unwrap();
        assert!(cli.is_json());
        assert_eq!(cli.region.as_deref(), Some("us-east-1"));
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/state")));
        assert!(matches!(cli.command, Commands::Deploy(ref a) if a.yes));
    }

    #[test]
    fn test_completions_mention_subcommands() {
        let mut script = Vec::new();
        Cli::write_completions(clap_complete::Shell::Bash, &mut script);
        let script = String::from_utf8(script).unwrap();
        assert!(script.contains("stackform"));
        assert!(script.contains("destroy"));
    }

    #[test]
    fn test_unknown_output_format_rejected() {
        assert!(Cli::try_parse_from(["stackform", "--output", "xml", "plan"]).is_err());
    }
}
