//! `panelkit analyze`.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use panelkit_template::TemplateAnalysis;

use super::{Context, print_json, read_template};
use crate::theme::Theme;

/// Print what a template declares. Returns whether it parsed cleanly.
pub(crate) fn run(ctx: &Context, file: &Path) -> Result<bool> {
    let text = read_template(file)?;
    let analysis = TemplateAnalysis::from(&ctx.builder().parser().parse(&text));

    if ctx.json() {
        print_json(&analysis)?;
        return Ok(analysis.valid);
    }

    println!("{}", Theme::header(&file.display().to_string()));
    println!("{}", Theme::separator());
    println!(
        "  {}",
        Theme::kv("Name", analysis.name.as_deref().unwrap_or("-"))
    );
    println!(
        "  {}",
        Theme::kv("Version", analysis.version.as_deref().unwrap_or("-"))
    );
    println!(
        "  {}",
        Theme::kv("Components", &analysis.component_count.to_string())
    );
    println!(
        "  {}",
        Theme::kv("Actions", &analysis.action_count.to_string())
    );
    println!(
        "  {}",
        Theme::kv("Events", &analysis.event_count.to_string())
    );

    if !analysis.blocks.is_empty() {
        println!("\n  {}", "Blocks:".bold());
        for block in &analysis.blocks {
            if ctx.registry.contains(block) {
                println!("    {block}");
            } else {
                println!("    {} {}", block, Theme::dimmed("(not in catalog)"));
            }
        }
    }

    if !analysis.errors.is_empty() {
        println!("\n  {}", "Syntax errors:".bold());
        for error in &analysis.errors {
            println!("    {}", Theme::error(&error.to_string()));
        }
    }

    Ok(analysis.valid)
}
