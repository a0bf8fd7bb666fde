//! Deploy and destroy commands
//!
//! Both plan first, ask for confirmation unless `--yes` is given, apply the
//! change-set to the sandbox control plane and save state even when some
//! changes fail.

use super::CommandContext;
use anyhow::{bail, Context, Result};
use clap::Parser;
use is_terminal::IsTerminal;

use stackform::executor::ApplyReport;
use stackform::plan::{ChangeSet, Planner};
use stackform::state::StackState;
use stackform::template::Template;

/// Arguments for the deploy command
#[derive(Parser, Debug, Clone)]
pub struct DeployArgs {
    /// Apply without asking for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Arguments for the destroy command
#[derive(Parser, Debug, Clone)]
pub struct DestroyArgs {
    /// Destroy without asking for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl DeployArgs {
    /// Execute the deploy command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (stack, template) = ctx.synthesize()?;
        let mut state = ctx.load_state(stack.name())?;

        ctx.output.banner(&format!("DEPLOY {} ({})", stack.name(), stack.env()));
        let change_set = Planner::new()
            .plan(&template, &state)
            .context("Planning failed")?;

        if change_set.is_empty() {
            if ctx.output.is_json() {
                ctx.output.json(&serde_json::json!({
                    "stack": stack.name(),
                    "changes": 0,
                    "outputs": state.outputs,
                }))?;
            } else {
                ctx.output.plan(&change_set)?;
                ctx.output.outputs(&state.outputs, &Default::default());
            }
            return Ok(0);
        }

        if !ctx.output.is_json() {
            ctx.output.plan(&change_set)?;
        }
        if !confirm(self.yes, "Apply these changes?")? {
            ctx.output.warning("Deploy cancelled");
            return Ok(1);
        }

        let report = apply(ctx, &change_set, &template, &mut state).await?;

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::json!({
                "stack": stack.name(),
                "plan": change_set.summary(),
                "report": report,
                "outputs": state.outputs,
            }))?;
        } else {
            ctx.output.report(&report);
            ctx.output.outputs(&state.outputs, &Default::default());
        }

        finish(ctx, &report)
    }
}

impl DestroyArgs {
    /// Execute the destroy command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let stack = ctx.stack()?;
        let mut state = ctx.load_state(stack.name())?;

        ctx.output.banner(&format!("DESTROY {} ({})", stack.name(), stack.env()));
        if state.is_empty() {
            if ctx.output.is_json() {
                ctx.output
                    .json(&serde_json::json!({ "stack": stack.name(), "changes": 0 }))?;
            } else {
                ctx.output.success("Nothing to destroy.");
            }
            return Ok(0);
        }

        let change_set = Planner::new()
            .plan_destroy(&state)
            .context("Planning failed")?;
        if !ctx.output.is_json() {
            ctx.output.plan(&change_set)?;
        }
        if !confirm(self.yes, "Destroy every resource in this stack?")? {
            ctx.output.warning("Destroy cancelled");
            return Ok(1);
        }

        let report = apply(ctx, &change_set, &Template::default(), &mut state).await?;

        if state.is_empty() {
            ctx.persistence()?
                .delete(stack.name())
                .context("Cannot remove state file")?;
        }

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::json!({
                "stack": stack.name(),
                "plan": change_set.summary(),
                "report": report,
            }))?;
        } else {
            ctx.output.report(&report);
        }

        finish(ctx, &report)
    }
}

/// Apply a change-set and save the resulting state
async fn apply(
    ctx: &CommandContext,
    change_set: &ChangeSet,
    template: &Template,
    state: &mut StackState,
) -> Result<ApplyReport> {
    let executor = ctx.executor()?;
    // Log lines would tear the spinner apart
    let spinner = if ctx.verbosity == 0 {
        ctx.output.spinner("Applying changes")
    } else {
        None
    };

    let result = executor.apply(change_set, template, state).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = result.context("Apply aborted")?;

    // Partial results are still recorded
    ctx.persistence()?
        .save(state)
        .context("Cannot save state")?;
    Ok(report)
}

fn finish(ctx: &CommandContext, report: &ApplyReport) -> Result<i32> {
    match report.ensure_success() {
        Ok(()) => {
            ctx.output.success(&format!("Done in {}.", ctx.output.elapsed()));
            Ok(0)
        }
        Err(e) => {
            ctx.output.error(&e.to_string());
            ctx.output
                .hint("State records the changes that succeeded; fix the cause and run deploy again");
            Ok(1)
        }
    }
}

/// Ask for confirmation unless `yes` is set
fn confirm(yes: bool, prompt: &str) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        bail!("Refusing to apply without confirmation; pass --yes to run non-interactively");
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Cannot read confirmation")
}
