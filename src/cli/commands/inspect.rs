//! Read-only commands: synth, validate, graph and outputs.

use super::CommandContext;
use crate::cli::{SynthArgs, TemplateFormat};
use anyhow::Result;
use indexmap::IndexMap;

use stackform::graph::ResourceGraph;

impl SynthArgs {
    /// Print the synthesized template
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (_, template) = ctx.synthesize()?;
        let rendered = match self.format {
            TemplateFormat::Json => template.to_json()?,
            TemplateFormat::Yaml => template.to_yaml()?,
        };
        println!("{}", rendered.trim_end());
        Ok(0)
    }
}

/// Validate the stack and report what it declares
pub fn validate(ctx: &mut CommandContext) -> Result<i32> {
    let (stack, template) = match ctx.synthesize() {
        Ok(result) => result,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            if ctx.output.is_json() {
                ctx.output
                    .json(&serde_json::json!({ "valid": false, "error": format!("{:#}", e) }))?;
            }
            return Ok(1);
        }
    };
    let graph = ResourceGraph::from_template(&template)?;

    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "valid": true,
            "stack": stack.name(),
            "environment": stack.env().to_string(),
            "resources": graph.node_count(),
            "dependencies": graph.edge_count(),
            "outputs": template.outputs.len(),
        }))?;
    } else {
        ctx.output.success(&format!(
            "Stack {} is valid: {} resources, {} dependencies, {} outputs ({})",
            stack.name(),
            graph.node_count(),
            graph.edge_count(),
            template.outputs.len(),
            stack.env()
        ));
    }
    Ok(0)
}

/// Print the dependency graph
pub fn graph(ctx: &mut CommandContext) -> Result<i32> {
    let (_, template) = ctx.synthesize()?;
    let graph = ResourceGraph::from_template(&template)?;

    if ctx.output.is_json() {
        let nodes: Vec<_> = graph
            .creation_order()
            .into_iter()
            .map(|id| {
                let depends_on = graph.direct_dependencies(&id);
                serde_json::json!({ "id": id, "depends_on": depends_on })
            })
            .collect();
        ctx.output.json(&serde_json::json!({ "levels": graph.levels(), "nodes": nodes }))?;
    } else {
        print!("{}", graph.to_dot());
    }
    Ok(0)
}

/// Print the outputs recorded for the deployed stack
pub fn outputs(ctx: &mut CommandContext) -> Result<i32> {
    let stack = ctx.stack()?;
    let Some(state) = ctx.persistence()?.load(stack.name())? else {
        ctx.output
            .error(&format!("Stack {} has not been deployed", stack.name()));
        ctx.output.hint("Run `stackform deploy` first");
        return Ok(1);
    };

    if ctx.output.is_json() {
        ctx.output.json(&state.outputs)?;
        return Ok(0);
    }

    let descriptions: IndexMap<String, String> = stack
        .synthesize()
        .map(|template| {
            template
                .outputs
                .into_iter()
                .filter_map(|(name, output)| output.description.map(|d| (name, d)))
                .collect()
        })
        .unwrap_or_default();
    ctx.output.outputs(&state.outputs, &descriptions);
    Ok(0)
}
