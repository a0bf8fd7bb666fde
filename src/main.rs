//! Stackform - declare, plan and deploy the health visualization stack
//!
//! This is the main entry point for the Stackform CLI.

mod cli;
mod config;

use anyhow::Result;
use cli::commands::{inspect, CommandContext};
use cli::{Cli, Commands};
use config::{Config, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let mut config_warning = None;
    let config = Config::load(cli.config.as_ref()).unwrap_or_else(|e| {
        config_warning = Some(format!("Failed to load config: {:#}", e));
        Config::default()
    });

    // Initialize logging based on verbosity and config
    init_logging(cli.verbosity(), &config.logging);

    // Display version if verbose
    if cli.verbosity() >= 2 {
        eprintln!("Stackform v{} by {}", VERSION, AUTHORS);
    }

    // Create command context
    let mut ctx = CommandContext::new(&cli, config);
    if let Some(warning) = config_warning {
        ctx.output.warning(&warning);
    }

    let exit_code = match run(&cli, &mut ctx).await {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            1
        }
    };

    std::process::exit(exit_code);
}

/// Execute the selected command
async fn run(cli: &Cli, ctx: &mut CommandContext) -> Result<i32> {
    match &cli.command {
        Commands::Synth(args) => args.execute(ctx),
        Commands::Validate => inspect::validate(ctx),
        Commands::Graph => inspect::graph(ctx),
        Commands::Plan(args) => args.execute(ctx),
        Commands::Deploy(args) => args.execute(ctx).await,
        Commands::Destroy(args) => args.execute(ctx).await,
        Commands::Outputs => inspect::outputs(ctx),
        Commands::Completions(args) => {
            Cli::write_completions(args.shell, &mut std::io::stdout());
            Ok(0)
        }
    }
}

/// Initialize logging based on verbosity level
///
/// `RUST_LOG` wins over everything; otherwise `-v` flags pick the level and
/// the configured level applies when none are given. Logs go to stderr so
/// JSON output on stdout stays parseable.
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (text_layer, json_layer) = if logging.is_json() {
        (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
