//! panelkit CLI - validate, inspect, build, and watch panel templates.
//!
//! Blocks come from a TOML catalog (`--blocks`, or the built-in one) and are
//! registered as generic element capabilities, so templates can be checked
//! without the host application.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod catalog;
mod commands;
mod theme;

use commands::{Context, OutputFormat, analyze, build, validate, watch};
use panelkit_config::Config;
use panelkit_telemetry::{LogConfig, setup_logging};
use theme::Theme;

/// panelkit - author panels as plain-text templates
#[derive(Parser)]
#[command(name = "panelkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Block catalog (TOML) to register instead of the built-in one
    #[arg(long, global = true, env = "PANELKIT_BLOCKS")]
    blocks: Option<PathBuf>,

    /// Workspace root holding `.panelkit/config.toml` (defaults to the
    /// current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and build templates, reporting every error and warning
    Validate {
        /// Template files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Summarise a template without building it
    Analyze {
        /// Template file
        file: PathBuf,
    },

    /// Build a template and print its component tree
    Build {
        /// Template file
        file: PathBuf,

        /// Host state as a JSON object
        #[arg(long)]
        state: Option<String>,
    },

    /// Build every template in a directory and rebuild on change
    Watch {
        /// Template directory (defaults to `templates.directory`)
        dir: Option<PathBuf>,

        /// Report file changes without rebuilding
        #[arg(long)]
        no_hot_reload: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", Theme::error(&format!("{e:#}")));
            ExitCode::from(2)
        },
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };

    let resolved = Config::load(Some(&root)).context("failed to load configuration")?;
    let mut log_config = LogConfig::try_from(&resolved.config.logging)?;
    if cli.verbose {
        log_config.level = "debug".to_owned();
    }
    setup_logging(&log_config)?;
    tracing::debug!(
        files = ?resolved.loaded_files,
        env_overrides = resolved.env_overrides,
        "Configuration loaded"
    );

    let ctx = Context {
        config: resolved.config,
        root,
        registry: catalog::load(cli.blocks.as_deref())?,
        format: cli.format,
    };

    match cli.command {
        Commands::Validate { files } => validate::run(&ctx, &files),
        Commands::Analyze { file } => analyze::run(&ctx, &file),
        Commands::Build { file, state } => build::run(&ctx, &file, state.as_deref()).await,
        Commands::Watch { dir, no_hot_reload } => {
            watch::run(&ctx, dir.as_deref(), no_hot_reload).await
        },
    }
}
