//! `panelkit build`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use serde_json::Value;

use panelkit_core::{RenderKind, RenderNode};
use panelkit_events::EventBus;
use panelkit_runtime::{FsSource, OrchestratorOptions, SourceKey, TemplateOrchestrator};

use super::{Context, print_json};
use crate::theme::Theme;

/// Build one template against optional JSON host state. Returns whether the
/// build had no errors.
pub(crate) async fn run(ctx: &Context, file: &Path, state: Option<&str>) -> Result<bool> {
    let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
        bail!("not a template file: {}", file.display());
    };
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let orchestrator = TemplateOrchestrator::new(
        Arc::new(FsSource::new(dir)),
        ctx.builder(),
        EventBus::new(),
        OrchestratorOptions {
            hot_reload: false,
            ..OrchestratorOptions::default()
        },
    );

    if let Some(state) = state {
        let value: Value = serde_json::from_str(state).context("--state is not valid JSON")?;
        if !value.is_object() {
            bail!("--state must be a JSON object");
        }
        orchestrator.state().replace(value);
    }

    let result = orchestrator.load_template(SourceKey::new(name)).await;
    orchestrator.shutdown().await;
    let artifact = result?;

    if ctx.json() {
        print_json(&*artifact)?;
        return Ok(artifact.is_ok());
    }

    println!("{}", Theme::header(&file.display().to_string()));
    println!("{}", Theme::separator());
    print_node(&artifact.root, 1);

    println!();
    println!(
        "  {}",
        Theme::kv("Blocks used", &artifact.blocks_used.join(", "))
    );
    for warning in &artifact.warnings {
        println!("  {}", Theme::warning(&warning.to_string()));
    }
    for error in &artifact.errors {
        println!("  {}", Theme::error(&error.to_string()));
    }
    if artifact.is_ok() {
        println!("\n{}", Theme::success("Build succeeded"));
    } else {
        println!(
            "\n{}",
            Theme::error(&format!("Build failed with {} error(s)", artifact.errors.len()))
        );
    }
    Ok(artifact.is_ok())
}

fn print_node(node: &RenderNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let label = match &node.kind {
        RenderKind::Element => node.block.clone().unwrap_or_default().bold().to_string(),
        RenderKind::Group => "(group)".dimmed().to_string(),
        RenderKind::Diagnostic { .. } => format!(
            "diagnostic{}",
            node.block
                .as_deref()
                .map(|b| format!(" [{b}]"))
                .unwrap_or_default()
        )
        .red()
        .to_string(),
    };

    let props = if node.props.is_empty() {
        String::new()
    } else {
        format!(" {}", Theme::dimmed(&Value::Object(node.props.clone()).to_string()))
    };
    println!("{indent}{label}{props}");

    for message in node.messages() {
        println!("{indent}  {}", Theme::error(message));
    }
    for (event, action) in &node.bindings {
        println!("{indent}  {}", Theme::info(&format!("on {event} -> {action}")));
    }
    for child in &node.children {
        print_node(child, depth.saturating_add(1));
    }
}
