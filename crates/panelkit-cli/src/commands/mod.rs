//! Subcommand implementations.

pub(crate) mod analyze;
pub(crate) mod build;
pub(crate) mod validate;
pub(crate) mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::ValueEnum;

use panelkit_blocks::CapabilityRegistry;
use panelkit_builder::{BuildOptions, ComponentBuilder};
use panelkit_config::Config;
use panelkit_core::NullBridge;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable, colored.
    Pretty,
    /// One JSON document (or one per line for `watch`).
    Json,
}

/// Everything a subcommand needs.
pub(crate) struct Context {
    pub(crate) config: Config,
    pub(crate) root: PathBuf,
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) format: OutputFormat,
}

impl Context {
    /// A builder over the catalog registry.
    ///
    /// The CLI has no host, so the bridge rejects every request.
    pub(crate) fn builder(&self) -> ComponentBuilder {
        ComponentBuilder::new(
            Arc::clone(&self.registry),
            Arc::new(NullBridge::new("panelkit-cli")),
        )
        .with_options(BuildOptions {
            max_depth: self.config.build.max_depth,
            warn_unused_actions: self.config.build.warn_unused_actions,
        })
    }

    pub(crate) fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

/// Read a template file.
pub(crate) fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

/// Print `value` as pretty JSON.
pub(crate) fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
