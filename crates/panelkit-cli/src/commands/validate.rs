//! `panelkit validate`.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use panelkit_builder::{BuildError, BuildWarning};

use super::{Context, print_json, read_template};
use crate::theme::Theme;

#[derive(Serialize)]
struct FileReport {
    file: PathBuf,
    valid: bool,
    errors: Vec<BuildError>,
    warnings: Vec<BuildWarning>,
}

/// Validate each file. Returns whether all of them are valid.
pub(crate) fn run(ctx: &Context, files: &[PathBuf]) -> Result<bool> {
    let builder = ctx.builder();
    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let validation = builder.validate(&read_template(file)?);
        reports.push(FileReport {
            file: file.clone(),
            valid: validation.valid,
            errors: validation.errors,
            warnings: validation.warnings,
        });
    }

    let all_valid = reports.iter().all(|r| r.valid);
    if ctx.json() {
        print_json(&reports)?;
        return Ok(all_valid);
    }

    for report in &reports {
        let name = report.file.display().to_string();
        if report.valid {
            println!("{}", Theme::success(&name));
        } else {
            println!("{}", Theme::error(&name));
        }
        for error in &report.errors {
            println!("    {}", Theme::error(&error.to_string()));
        }
        for warning in &report.warnings {
            println!("    {}", Theme::warning(&warning.to_string()));
        }
    }

    let failed = reports.iter().filter(|r| !r.valid).count();
    println!();
    if failed == 0 {
        println!("{}", Theme::success(&format!("{} template(s) valid", reports.len())));
    } else {
        println!(
            "{}",
            Theme::error(&format!("{failed} of {} template(s) invalid", reports.len()))
        );
    }
    Ok(all_valid)
}
