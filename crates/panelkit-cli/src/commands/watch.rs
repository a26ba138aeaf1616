//! `panelkit watch`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tracing::{debug, warn};

use panelkit_events::{EventBus, PanelEvent};
use panelkit_runtime::{
    FsSource, OrchestratorOptions, OrchestratorStatus, TemplateOrchestrator, TemplateSource,
    WatcherConfig,
};

use super::Context;
use crate::theme::Theme;

/// Build every template under `dir` and rebuild on change until Ctrl-C.
pub(crate) async fn run(ctx: &Context, dir: Option<&Path>, no_hot_reload: bool) -> Result<bool> {
    let templates = &ctx.config.templates;
    let dir = dir.map_or_else(|| templates.directory_in(&ctx.root), Path::to_path_buf);
    if !dir.is_dir() {
        bail!("template directory {} does not exist", dir.display());
    }

    let source = Arc::new(FsSource::new(&dir));
    let events = &ctx.config.events;
    let bus = EventBus::with_limits(events.channel_capacity, events.max_emit_depth);
    let options = OrchestratorOptions {
        hot_reload: templates.hot_reload && !no_hot_reload,
        activity_log_capacity: ctx.config.cache.activity_log_capacity,
        extensions: templates.extensions.clone(),
        debounce: templates.debounce(),
    };
    let orchestrator = TemplateOrchestrator::new(
        Arc::clone(&source) as Arc<dyn TemplateSource>,
        ctx.builder(),
        bus,
        options,
    );

    // Subscribe before the first load so its events are printed too.
    let mut receiver = orchestrator.bus().receiver();

    if !ctx.json() {
        println!("{}", Theme::header(&format!("Watching {}", dir.display())));
        println!("{}", Theme::separator());
    }

    let scan = WatcherConfig {
        root: dir.clone(),
        extensions: templates.extensions.clone(),
        debounce: templates.debounce(),
    };
    for path in &scan.scan() {
        load(&orchestrator, source.as_ref(), path).await;
    }

    orchestrator
        .start_watching(&dir)
        .await
        .context("cannot start the file watcher")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            event = receiver.recv() => {
                let Some(event) = event else {
                    break;
                };
                print_event(ctx, &event)?;
                if let PanelEvent::FileAdded { path, .. } = &*event {
                    load(&orchestrator, source.as_ref(), path).await;
                }
            }
        }
    }

    let status = orchestrator.status();
    orchestrator.shutdown().await;
    if !ctx.json() {
        print_summary(&status);
    }
    Ok(true)
}

async fn load(orchestrator: &TemplateOrchestrator, source: &FsSource, path: &Path) {
    let Some(key) = source.key_for_path(path) else {
        return;
    };
    if let Err(e) = orchestrator.load_template(key.clone()).await {
        warn!(key = %key, error = %e, "Template could not be loaded");
    }
}

fn print_event(ctx: &Context, event: &PanelEvent) -> Result<()> {
    if ctx.json() {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let detail = match event {
        PanelEvent::TemplateLoaded { key, name, .. } => match name {
            Some(name) => format!("{key} ({name})"),
            None => key.clone(),
        },
        PanelEvent::TemplateBuilt {
            key,
            blocks_used,
            warnings,
            ..
        } => format!("{key}: {} blocks, {warnings} warnings", blocks_used.len()),
        PanelEvent::TemplateError { key, errors, .. } => {
            let mut lines = vec![format!("{key}: {} errors", errors.len())];
            lines.extend(errors.iter().map(|e| format!("      {}", Theme::error(e))));
            lines.join("\n")
        },
        PanelEvent::FileAdded { path, .. }
        | PanelEvent::FileChanged { path, .. }
        | PanelEvent::FileRemoved { path, .. } => path.display().to_string(),
        PanelEvent::CacheCleared { entries, .. } => format!("{entries} entries"),
        PanelEvent::StateChanged { key, revision, .. } => format!("{key} @ {revision}"),
        PanelEvent::ActionStarted { key, action, .. }
        | PanelEvent::ActionCompleted { key, action, .. } => format!("{key}#{action}"),
        PanelEvent::ActionFailed {
            key, action, error, ..
        } => format!("{key}#{action}: {error}"),
        PanelEvent::ActionCancelled {
            key,
            action,
            skipped_steps,
            ..
        } => format!("{key}#{action}: {skipped_steps} steps skipped"),
    };

    println!(
        "{} {} {}",
        Theme::timestamp(&event.metadata().timestamp),
        Theme::event_type(event.event_type()),
        detail
    );
    Ok(())
}

fn print_summary(status: &OrchestratorStatus) {
    println!();
    println!("{}", Theme::separator());
    println!(
        "{}",
        Theme::info(&format!(
            "{} loaded, {} cached",
            status.loaded, status.cached
        ))
    );
}
