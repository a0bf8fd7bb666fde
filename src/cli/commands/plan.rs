//! Plan command - show pending changes
//!
//! Diffs the synthesized stack against recorded state without touching the
//! sandbox control plane.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;

use stackform::plan::Planner;

/// Arguments for the plan command
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Plan the removal of every deployed resource instead
    #[arg(long)]
    pub destroy: bool,

    /// Exit with 2 when there are changes
    #[arg(long)]
    pub detailed_exitcode: bool,
}

impl PlanArgs {
    /// Execute the plan command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (stack, template) = ctx.synthesize()?;
        let state = ctx.load_state(stack.name())?;

        let planner = Planner::new();
        let change_set = if self.destroy {
            planner.plan_destroy(&state)
        } else {
            planner.plan(&template, &state)
        }
        .context("Planning failed")?;

        ctx.output.plan(&change_set)?;

        if self.detailed_exitcode && !change_set.is_empty() {
            return Ok(2);
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_args_parsing() {
        let args = PlanArgs::try_parse_from(["plan", "--destroy"]).unwrap();
        assert!(args.destroy);
        assert!(!args.detailed_exitcode);
    }
}
