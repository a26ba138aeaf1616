//! Template directory watcher.
//!
//! Watches a template directory, debounces events per file, and emits
//! [`WatchEvent`]s only when a template's content actually changed
//! (verified via blake3 hashing).
//!
//! ```text
//! filesystem events (notify)
//!   → filter by template extension
//!   → debounce per file
//!   → blake3 hash file content
//!   → compare to cached hash
//!   → emit Added / Changed / Removed
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};

/// Default debounce interval for file change events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Default recognised template suffixes.
pub const DEFAULT_EXTENSIONS: &[&str] = &["panel.yaml", "panel.yml", "yaml", "yml"];

/// Directory names never descended into.
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target"];

/// Events emitted by the template watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A template file appeared.
    Added(PathBuf),
    /// A template file's content changed.
    Changed(PathBuf),
    /// A template file disappeared.
    Removed(PathBuf),
    /// The watcher hit a non-fatal error.
    Error(String),
}

/// Configuration for the template watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory to watch recursively.
    pub root: PathBuf,
    /// Recognised file name suffixes, without a leading dot.
    pub extensions: Vec<String>,
    /// File changes within this window are coalesced.
    pub debounce: Duration,
}

impl WatcherConfig {
    /// Watch `root` with the default extensions and debounce.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Whether `path` names a template file.
    #[must_use]
    pub fn is_template(&self, path: &Path) -> bool {
        if is_in_ignored_dir(path.strip_prefix(&self.root).unwrap_or(path)) {
            return false;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.extensions.iter().any(|ext| {
            name.strip_suffix(ext.as_str())
                .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
        })
    }

    /// Template files currently under `root`, sorted.
    ///
    /// Ignored directories are skipped and symlinks are never followed.
    /// Unreadable directories are skipped silently.
    #[must_use]
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_templates(self, &self.root, &mut found);
        found.sort();
        found
    }
}

/// Watches a template directory and emits [`WatchEvent`]s.
pub struct TemplateWatcher {
    config: WatcherConfig,
    /// blake3 hash per known template file.
    hashes: HashMap<PathBuf, String>,
    /// Dropping the `notify` handle stops filesystem monitoring.
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    event_tx: mpsc::Sender<WatchEvent>,
}

impl std::fmt::Debug for TemplateWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateWatcher")
            .field("config", &self.config)
            .field("known_files", &self.hashes.len())
            .finish_non_exhaustive()
    }
}

impl TemplateWatcher {
    /// Create a watcher. Call [`run`](Self::run) to start it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Watcher`] if the filesystem watcher cannot be
    /// initialized.
    pub fn new(config: WatcherConfig) -> RuntimeResult<(Self, mpsc::Receiver<WatchEvent>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| RuntimeError::Watcher(format!("filesystem watcher: {e}")))?;

        Ok((
            Self {
                config,
                hashes: HashMap::new(),
                watcher,
                raw_rx,
                event_tx,
            },
            event_rx,
        ))
    }

    /// Run the event loop until `cancel` fires or the consumer goes away.
    ///
    /// `ready` resolves once the directory is watched and existing templates
    /// are hashed, or with the error that prevented it.
    pub async fn run(
        mut self,
        ready: oneshot::Sender<RuntimeResult<()>>,
        cancel: CancellationToken,
    ) {
        let root = self.config.root.clone();
        if let Err(e) = self.watcher.watch(&root, RecursiveMode::Recursive) {
            warn!(path = %root.display(), error = %e, "Failed to watch template directory");
            let _ = ready.send(Err(RuntimeError::Watcher(format!(
                "cannot watch {}: {e}",
                root.display()
            ))));
            return;
        }

        self.prime_hashes().await;
        info!(
            path = %root.display(),
            templates = self.hashes.len(),
            "Watching template directory"
        );
        let _ = ready.send(Ok(()));

        let debounce = self.config.debounce;
        let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();

        loop {
            let next_deadline = pending.values().copied().min();

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("Template watcher cancelled");
                    break;
                }

                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let now = tokio::time::Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();

                    for path in ready {
                        pending.remove(&path);
                        if !self.process_path(&path).await {
                            return;
                        }
                    }
                }

                event = self.raw_rx.recv() => {
                    match event {
                        Some(Ok(ev)) => self.handle_raw_event(&ev, &mut pending, debounce),
                        Some(Err(e)) => {
                            warn!(error = %e, "Filesystem watcher error");
                            if self.event_tx.send(WatchEvent::Error(e.to_string())).await.is_err() {
                                debug!("Event receiver dropped, stopping watcher");
                                return;
                            }
                        },
                        None => {
                            debug!("Filesystem watcher channel closed, stopping");
                            break;
                        },
                    }
                }
            }
        }
    }

    /// Hash every template already present so the first edit reports
    /// `Changed` and no-op saves are suppressed.
    async fn prime_hashes(&mut self) {
        let config = self.config.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            config
                .scan()
                .into_iter()
                .filter_map(|path| hash_file(&path).ok().map(|hash| (path, hash)))
                .collect::<Vec<_>>()
        })
        .await;

        match scanned {
            Ok(entries) => self.hashes.extend(entries),
            Err(e) => warn!(error = %e, "Initial template scan was cancelled"),
        }
    }

    /// Reset the debounce timer for every template path in the event.
    fn handle_raw_event(
        &self,
        event: &Event,
        pending: &mut HashMap<PathBuf, tokio::time::Instant>,
        debounce: Duration,
    ) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {},
            _ => return,
        }

        for path in &event.paths {
            if !self.config.is_template(path) {
                continue;
            }
            debug!(path = %path.display(), kind = ?event.kind, "Template file event");
            #[allow(clippy::arithmetic_side_effects)]
            // Instant + Duration cannot overflow in practice
            let deadline = tokio::time::Instant::now() + debounce;
            pending.insert(path.clone(), deadline);
        }
    }

    /// Compare the file's hash to the cached one and emit the matching
    /// event. Returns `false` once the consumer is gone.
    async fn process_path(&mut self, path: &Path) -> bool {
        let owned = path.to_path_buf();
        let hashed = tokio::task::spawn_blocking(move || hash_file(&owned)).await;

        let event = match hashed {
            Ok(Ok(hash)) => match self.hashes.insert(path.to_path_buf(), hash.clone()) {
                None => WatchEvent::Added(path.to_path_buf()),
                Some(previous) if previous != hash => WatchEvent::Changed(path.to_path_buf()),
                Some(_) => {
                    debug!(path = %path.display(), "Template content unchanged, skipping");
                    return true;
                },
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.hashes.remove(path).is_none() {
                    return true;
                }
                WatchEvent::Removed(path.to_path_buf())
            },
            Ok(Err(e)) => {
                WatchEvent::Error(format!("Hash failed for {}: {e}", path.display()))
            },
            Err(e) => {
                warn!(error = %e, "Hash task was cancelled");
                return true;
            },
        };

        info!(event = ?event, "Template file change");
        if self.event_tx.send(event).await.is_err() {
            debug!("Event receiver dropped, stopping watcher");
            return false;
        }
        true
    }
}

/// Check if a path contains any ignored directory component.
fn is_in_ignored_dir(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| IGNORED_DIRS.contains(&s))
    })
}

/// blake3 hash of a file's content.
///
/// # Errors
///
/// Returns the read error, e.g. `NotFound` once the file is deleted.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read(path)?;
    Ok(blake3::hash(&content).to_hex().to_string())
}

/// Recursively collect template files, skipping ignored directories and
/// symlinks.
fn collect_templates(config: &WatcherConfig, dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            if !is_in_ignored_dir(Path::new(&entry.file_name())) {
                collect_templates(config, &path, found);
            }
        } else if file_type.is_file() && config.is_template(&path) {
            found.push(path);
        }
    }
}
