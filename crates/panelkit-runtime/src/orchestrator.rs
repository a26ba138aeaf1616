//! Template orchestrator.
//!
//! [`TemplateOrchestrator`] is the single owner of the artifact cache and the
//! loaded-template registry. It reads templates from a [`TemplateSource`],
//! builds them with a [`ComponentBuilder`], reacts to watcher notifications,
//! and announces everything on the [`EventBus`].
//!
//! Concurrent loads of one key share a single spawned build task. A caller
//! that stops waiting does not cancel that task; the cache is still updated.
//!
//! Every key carries a generation. Invalidation, eviction, and text loads
//! bump it, and a build only stores and announces its result if the
//! generation it started under is still current. A build overtaken by a
//! newer one therefore never replaces the newer artifact.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use panelkit_builder::{BuildArtifact, ComponentBuilder, Validation};
use panelkit_core::{BridgeHandler, BridgeSubscription, StateStore};
use panelkit_events::{EventBus, EventMetadata, PanelEvent};
use panelkit_template::{TemplateAnalysis, TemplateAst};

use crate::actions::{ActionReport, ActionRunner};
use crate::cache::{
    ActivityEntry, ActivityKind, ActivityLog, ArtifactCache, CacheEntry, EntryOrigin,
};
use crate::error::{RuntimeError, RuntimeResult};
use crate::source::{Fingerprint, SourceKey, TemplateSource};
use crate::watcher::{
    DEFAULT_DEBOUNCE, DEFAULT_EXTENSIONS, TemplateWatcher, WatchEvent, WatcherConfig,
};

const EVENT_SOURCE: &str = "panelkit-runtime";

/// Default number of activity log entries kept for [`OrchestratorStatus`].
pub const DEFAULT_ACTIVITY_LOG_CAPACITY: usize = 50;

type SharedBuild = Shared<BoxFuture<'static, RuntimeResult<Arc<BuildArtifact>>>>;

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Rebuild known templates when their files change.
    pub hot_reload: bool,
    /// Entries kept in the status activity log.
    pub activity_log_capacity: usize,
    /// File extensions the watcher reports.
    pub extensions: Vec<String>,
    /// Quiet period before a file change is reported.
    pub debounce: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            hot_reload: true,
            activity_log_capacity: DEFAULT_ACTIVITY_LOG_CAPACITY,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// A parsed template kept for action dispatch and rebuilds.
#[derive(Debug, Clone)]
struct LoadedTemplate {
    ast: Arc<TemplateAst>,
    fingerprint: Fingerprint,
    origin: EntryOrigin,
    loaded_at: DateTime<Utc>,
}

/// One loaded template as reported by [`TemplateOrchestrator::status`].
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    /// Source key.
    pub key: SourceKey,
    /// Declared name.
    pub name: String,
    /// Declared version.
    pub version: String,
    /// Where the text came from.
    pub origin: EntryOrigin,
    /// When it was last parsed.
    pub loaded_at: DateTime<Utc>,
}

/// Snapshot of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Loaded templates, sorted by key.
    pub templates: Vec<TemplateSummary>,
    /// Number of loaded templates.
    pub loaded: usize,
    /// Number of cache entries.
    pub cached: usize,
    /// Builds currently running.
    pub in_flight: usize,
    /// Watched directory, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watching: Option<PathBuf>,
    /// Whether file changes trigger rebuilds.
    pub hot_reload: bool,
    /// Whether [`TemplateOrchestrator::shutdown`] has run.
    pub shut_down: bool,
    /// Recent activity, most recent first.
    pub activity: Vec<ActivityEntry>,
}

struct InFlight {
    id: u64,
    build: SharedBuild,
}

struct Inner {
    source: Arc<dyn TemplateSource>,
    builder: ComponentBuilder,
    bus: EventBus,
    state: StateStore,
    options: OrchestratorOptions,
    cache: RwLock<ArtifactCache>,
    loaded: RwLock<HashMap<SourceKey, LoadedTemplate>>,
    bindings: Mutex<HashMap<SourceKey, Vec<BridgeSubscription>>>,
    inflight: Mutex<HashMap<SourceKey, InFlight>>,
    generations: Mutex<HashMap<SourceKey, u64>>,
    next_flight: AtomicU64,
    activity: Mutex<ActivityLog>,
    cancel: CancellationToken,
    shut_down: AtomicBool,
    watching: Mutex<Option<PathBuf>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Coordinates parsing, building, caching, and hot reload.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct TemplateOrchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for TemplateOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateOrchestrator")
            .field("options", &self.inner.options)
            .field("cached", &read(&self.inner.cache).len())
            .field("loaded", &read(&self.inner.loaded).len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl TemplateOrchestrator {
    /// Create an orchestrator.
    ///
    /// `builder` carries the registry, the bridge, and the build options.
    #[must_use]
    pub fn new(
        source: Arc<dyn TemplateSource>,
        builder: ComponentBuilder,
        bus: EventBus,
        options: OrchestratorOptions,
    ) -> Self {
        let activity = ActivityLog::new(options.activity_log_capacity);
        Self {
            inner: Arc::new(Inner {
                source,
                builder,
                bus,
                state: StateStore::new(),
                options,
                cache: RwLock::new(ArtifactCache::default()),
                loaded: RwLock::new(HashMap::new()),
                bindings: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                generations: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                activity: Mutex::new(activity),
                cancel: CancellationToken::new(),
                shut_down: AtomicBool::new(false),
                watching: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The event bus lifecycle events are emitted on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Host state shared by every build and action.
    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.inner.state
    }

    /// The builder templates are built with.
    #[must_use]
    pub fn builder(&self) -> &ComponentBuilder {
        &self.inner.builder
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// The cached artifact for `key`, without checking the source.
    #[must_use]
    pub fn cached(&self, key: &SourceKey) -> Option<Arc<BuildArtifact>> {
        read(&self.inner.cache)
            .get(key)
            .map(|entry| Arc::clone(&entry.artifact))
    }

    /// Load a template, serving the cache when the source is unchanged.
    ///
    /// A fresh cache entry is returned without reading or rebuilding.
    /// Otherwise the template is read, parsed, built, and stored, and
    /// `template:loaded` is emitted followed by `template:built` or
    /// `template:error`. Concurrent calls for one key share the same build.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::SourceUnavailable`] if the source cannot be
    /// read and [`RuntimeError::ShutDown`] after shutdown. Build problems are
    /// reported inside the artifact.
    pub async fn load_template(
        &self,
        key: impl Into<SourceKey>,
    ) -> RuntimeResult<Arc<BuildArtifact>> {
        let key = key.into();
        self.ensure_running()?;
        if let Some(artifact) = self.fresh_entry(&key).await {
            return Ok(artifact);
        }
        self.load_coalesced(key, false).await
    }

    /// Build template text supplied directly and cache it under `id`.
    ///
    /// Always rebuilds. Later [`load_template`](Self::load_template) calls
    /// for `id` serve this entry while the source has no template by that
    /// key.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ShutDown`] after shutdown.
    pub fn load_template_from_text(
        &self,
        text: &str,
        id: impl Into<SourceKey>,
    ) -> RuntimeResult<Arc<BuildArtifact>> {
        self.ensure_running()?;
        let key = id.into();
        let generation = self.supersede(&key);
        Ok(self.build_and_store(
            &key,
            text,
            Fingerprint::of_text(text),
            EntryOrigin::Text,
            generation,
        ))
    }

    /// Re-read and rebuild a template regardless of its cache entry.
    ///
    /// # Errors
    ///
    /// Same as [`load_template`](Self::load_template).
    pub async fn reload_template(
        &self,
        key: impl Into<SourceKey>,
    ) -> RuntimeResult<Arc<BuildArtifact>> {
        let key = key.into();
        self.ensure_running()?;
        info!(key = %key, "Reloading template");
        self.load_coalesced(key, true).await
    }

    /// Drop the cache entry for `key`. Returns whether one existed.
    ///
    /// A build already running for `key` finishes without storing its
    /// result, and later loads start a new one instead of joining it.
    pub fn invalidate(&self, key: &SourceKey) -> bool {
        self.supersede(key);
        let existed = write(&self.inner.cache).remove(key).is_some();
        if existed {
            debug!(key = %key, "Cache entry invalidated");
            self.record(ActivityKind::Invalidated, Some(key), "cache entry invalidated");
        }
        existed
    }

    /// Drop every cache entry and emit `cache:cleared`.
    ///
    /// Loaded templates stay registered; their next load rebuilds.
    pub fn clear_cache(&self) -> usize {
        let entries = write(&self.inner.cache).clear();
        info!(entries, "Template cache cleared");
        self.record(ActivityKind::CacheCleared, None, format!("{entries} entries dropped"));
        self.emit(PanelEvent::CacheCleared {
            metadata: EventMetadata::new(EVENT_SOURCE),
            entries,
        });
        entries
    }

    /// Parse and build `text` against empty state, reporting every problem.
    #[must_use]
    pub fn validate(&self, text: &str) -> Validation {
        self.inner.builder.validate(text)
    }

    /// Summarise `text` without building it.
    #[must_use]
    pub fn analyze(&self, text: &str) -> TemplateAnalysis {
        TemplateAnalysis::from(&self.inner.builder.parser().parse(text))
    }

    /// Current counts, loaded templates, and recent activity.
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        let mut templates: Vec<TemplateSummary> = read(&self.inner.loaded)
            .iter()
            .map(|(key, loaded)| TemplateSummary {
                key: key.clone(),
                name: loaded.ast.name.clone(),
                version: loaded.ast.version.clone(),
                origin: loaded.origin,
                loaded_at: loaded.loaded_at,
            })
            .collect();
        templates.sort_by(|a, b| a.key.cmp(&b.key));

        OrchestratorStatus {
            loaded: templates.len(),
            templates,
            cached: read(&self.inner.cache).len(),
            in_flight: lock(&self.inner.inflight).len(),
            watching: lock(&self.inner.watching).clone(),
            hot_reload: self.inner.options.hot_reload,
            shut_down: self.is_shut_down(),
            activity: lock(&self.inner.activity).snapshot(),
        }
    }

    /// Apply one watcher notification.
    ///
    /// Additions and changes emit `file:added` / `file:changed` and
    /// invalidate the entry; with hot reload on, templates that were cached
    /// or loaded are rebuilt. Removals evict the cache entry, the loaded
    /// record, and its event bindings, then emit `file:removed`.
    pub async fn handle_watch_event(&self, event: WatchEvent) {
        if self.is_shut_down() {
            return;
        }

        match event {
            WatchEvent::Added(path) => {
                self.emit(PanelEvent::FileAdded {
                    metadata: EventMetadata::new(EVENT_SOURCE),
                    path: path.clone(),
                });
                self.refresh(&path).await;
            },
            WatchEvent::Changed(path) => {
                self.emit(PanelEvent::FileChanged {
                    metadata: EventMetadata::new(EVENT_SOURCE),
                    path: path.clone(),
                });
                self.refresh(&path).await;
            },
            WatchEvent::Removed(path) => {
                if let Some(key) = self.inner.source.key_for_path(&path) {
                    self.evict(&key);
                }
                self.emit(PanelEvent::FileRemoved {
                    metadata: EventMetadata::new(EVENT_SOURCE),
                    path,
                });
            },
            WatchEvent::Error(message) => {
                warn!(error = %message, "Template watcher reported an error");
                self.record(ActivityKind::Watcher, None, message);
            },
        }
    }

    /// Watch `dir` and feed its notifications to
    /// [`handle_watch_event`](Self::handle_watch_event).
    ///
    /// Resolves once the watcher is ready.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Watcher`] if a watcher is already running or
    /// the directory cannot be watched, and [`RuntimeError::ShutDown`] after
    /// shutdown.
    pub async fn start_watching(&self, dir: impl AsRef<Path>) -> RuntimeResult<()> {
        self.ensure_running()?;
        let dir = dir.as_ref().to_path_buf();
        {
            let mut watching = lock(&self.inner.watching);
            if let Some(current) = watching.as_ref() {
                return Err(RuntimeError::Watcher(format!(
                    "already watching {}",
                    current.display()
                )));
            }
            *watching = Some(dir.clone());
        }

        let config = WatcherConfig {
            root: dir.clone(),
            extensions: self.inner.options.extensions.clone(),
            debounce: self.inner.options.debounce,
        };
        let (watcher, mut events) = match TemplateWatcher::new(config) {
            Ok(pair) => pair,
            Err(e) => {
                *lock(&self.inner.watching) = None;
                return Err(e);
            },
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let watcher_task = tokio::spawn(watcher.run(ready_tx, self.inner.cancel.child_token()));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let consumer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                TemplateOrchestrator { inner }.handle_watch_event(event).await;
            }
            debug!("Watch event consumer stopped");
        });

        lock(&self.inner.tasks).extend([watcher_task, consumer]);

        let ready = ready_rx.await.unwrap_or_else(|_| {
            Err(RuntimeError::Watcher(
                "watcher stopped before it was ready".into(),
            ))
        });
        match ready {
            Ok(()) => {
                info!(path = %dir.display(), "Hot reload watcher started");
                self.record(ActivityKind::Watcher, None, format!("watching {}", dir.display()));
                Ok(())
            },
            Err(e) => {
                *lock(&self.inner.watching) = None;
                Err(e)
            },
        }
    }

    /// Run a template's named action against the shared state.
    ///
    /// When the action changes state, `state:changed` is emitted and the
    /// template is rebuilt from its retained AST, without reading or
    /// parsing, followed by `template:built` or `template:error`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotLoaded`] if `key` has no loaded template,
    /// [`RuntimeError::Action`] if the action is not defined, and
    /// [`RuntimeError::ShutDown`] after shutdown. Step failures are reported
    /// in the [`ActionReport`].
    pub async fn dispatch_action(
        &self,
        key: impl Into<SourceKey>,
        action: &str,
        cancel: CancellationToken,
    ) -> RuntimeResult<ActionReport> {
        let key = key.into();
        self.ensure_running()?;
        let loaded = read(&self.inner.loaded)
            .get(&key)
            .cloned()
            .ok_or_else(|| RuntimeError::NotLoaded { key: key.clone() })?;

        let report = ActionRunner::new(
            key.as_str(),
            &loaded.ast.actions,
            &loaded.ast.state,
            &self.inner.state,
            self.inner.builder.bridge().as_ref(),
            &self.inner.bus,
        )
        .with_cancellation(cancel)
        .run(action)
        .await
        .map_err(|error| RuntimeError::Action {
            key: key.clone(),
            error,
        })?;

        self.record(
            ActivityKind::Action,
            Some(&key),
            format!("{action}: {}", report.state),
        );

        if report.state_changed && !self.is_shut_down() {
            self.emit(PanelEvent::StateChanged {
                metadata: EventMetadata::new(EVENT_SOURCE),
                key: key.to_string(),
                revision: self.inner.state.revision(),
            });
            let artifact = Arc::new(
                self.inner
                    .builder
                    .build(&loaded.ast, &self.inner.state.snapshot()),
            );
            self.store(&key, loaded.fingerprint, loaded.origin, &artifact);
            self.announce_build(&key, &artifact);
        }

        Ok(report)
    }

    /// Stop the watcher, drop listeners, bindings, and cache.
    ///
    /// Idempotent. Later loads fail with [`RuntimeError::ShutDown`].
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Orchestrator already shut down");
            return;
        }

        self.inner.cancel.cancel();
        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let bindings = std::mem::take(&mut *lock(&self.inner.bindings));
        drop(bindings);
        self.inner.bus.clear();
        lock(&self.inner.inflight).clear();
        let entries = write(&self.inner.cache).clear();
        write(&self.inner.loaded).clear();
        *lock(&self.inner.watching) = None;

        info!(entries, "Orchestrator shut down");
    }

    fn ensure_running(&self) -> RuntimeResult<()> {
        if self.is_shut_down() {
            Err(RuntimeError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// The cached artifact for `key` if its fingerprint still matches.
    async fn fresh_entry(&self, key: &SourceKey) -> Option<Arc<BuildArtifact>> {
        let (fingerprint, artifact, origin) = {
            let cache = read(&self.inner.cache);
            let entry = cache.get(key)?;
            (entry.fingerprint.clone(), Arc::clone(&entry.artifact), entry.origin)
        };

        match self.inner.source.fingerprint(key).await {
            Ok(current) if current == fingerprint => {},
            Err(e) if origin == EntryOrigin::Text && e.kind() == io::ErrorKind::NotFound => {},
            Ok(_) => {
                debug!(key = %key, "Cache entry stale");
                return None;
            },
            Err(e) => {
                debug!(key = %key, error = %e, "Cannot fingerprint cached template");
                return None;
            },
        }

        debug!(key = %key, "Template cache hit");
        self.record(ActivityKind::CacheHit, Some(key), "served from cache");
        Some(artifact)
    }

    /// Join the build running for `key`, or start one.
    async fn load_coalesced(
        &self,
        key: SourceKey,
        force: bool,
    ) -> RuntimeResult<Arc<BuildArtifact>> {
        let build = {
            let mut inflight = lock(&self.inner.inflight);
            if let Some(flight) = inflight.get(&key) {
                debug!(key = %key, "Joining in-flight build");
                flight.build.clone()
            } else {
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let generation = self.generation(&key);
                let this = self.clone();
                let task_key = key.clone();
                let task = tokio::spawn(async move {
                    let result = this.read_and_build(&task_key, force, generation).await;
                    this.finish_flight(&task_key, id);
                    result
                });

                let join_key = key.clone();
                let build: SharedBuild = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(RuntimeError::BuildAborted {
                            key: join_key,
                            message: e.to_string(),
                        })
                    })
                }
                .boxed()
                .shared();

                inflight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        build: build.clone(),
                    },
                );
                build
            }
        };
        build.await
    }

    fn finish_flight(&self, key: &SourceKey, id: u64) {
        let mut inflight = lock(&self.inner.inflight);
        if inflight.get(key).is_some_and(|flight| flight.id == id) {
            inflight.remove(key);
        }
    }

    fn generation(&self, key: &SourceKey) -> u64 {
        lock(&self.inner.generations)
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    /// Start a new generation for `key` and detach any running build, which
    /// then finishes without storing its result.
    fn supersede(&self, key: &SourceKey) -> u64 {
        let generation = {
            let mut generations = lock(&self.inner.generations);
            let slot = generations.entry(key.clone()).or_default();
            *slot = slot.wrapping_add(1);
            *slot
        };
        if lock(&self.inner.inflight).remove(key).is_some() {
            debug!(key = %key, generation, "In-flight build superseded");
        }
        generation
    }

    async fn read_and_build(
        &self,
        key: &SourceKey,
        force: bool,
        generation: u64,
    ) -> RuntimeResult<Arc<BuildArtifact>> {
        if !force && let Some(artifact) = self.fresh_entry(key).await {
            return Ok(artifact);
        }

        let source = &self.inner.source;
        // Fingerprint first: a write racing the read then only costs a
        // spurious rebuild, never a stale hit.
        let fingerprint = match source.fingerprint(key).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => return self.source_failed(key, &e),
        };
        let text = match source.read(key).await {
            Ok(text) => text,
            Err(e) => return self.source_failed(key, &e),
        };

        Ok(self.build_and_store(key, &text, fingerprint, EntryOrigin::Source, generation))
    }

    fn source_failed(
        &self,
        key: &SourceKey,
        error: &io::Error,
    ) -> RuntimeResult<Arc<BuildArtifact>> {
        if error.kind() == io::ErrorKind::NotFound {
            let text_entry = read(&self.inner.cache)
                .get(key)
                .filter(|entry| entry.origin == EntryOrigin::Text)
                .map(|entry| Arc::clone(&entry.artifact));
            if let Some(artifact) = text_entry {
                return Ok(artifact);
            }
        }

        warn!(key = %key, error = %error, "Template source unavailable");
        self.record(ActivityKind::SourceError, Some(key), error.to_string());
        Err(RuntimeError::SourceUnavailable {
            key: key.clone(),
            message: error.to_string(),
        })
    }

    /// Parse, build, cache, register, and announce.
    ///
    /// The artifact is returned to the build's waiters either way, but it is
    /// only stored and announced while `generation` is current for `key`.
    fn build_and_store(
        &self,
        key: &SourceKey,
        text: &str,
        fingerprint: Fingerprint,
        origin: EntryOrigin,
        generation: u64,
    ) -> Arc<BuildArtifact> {
        let outcome = self.inner.builder.parser().parse(text);
        let artifact = Arc::new(
            self.inner
                .builder
                .build_outcome(&outcome, &self.inner.state.snapshot()),
        );

        if self.is_shut_down() {
            return artifact;
        }

        let name = outcome.ast.as_ref().map(|ast| ast.name.clone());
        {
            // Held across the store so a concurrent supersede waits for it.
            let generations = lock(&self.inner.generations);
            let current = generations.get(key).copied().unwrap_or_default();
            if current != generation {
                drop(generations);
                debug!(key = %key, generation, current, "Discarding superseded build");
                self.record(ActivityKind::Superseded, Some(key), "newer build replaced it");
                return artifact;
            }

            self.store(key, fingerprint.clone(), origin, &artifact);
            match outcome.ast {
                Some(ast) => self.register(key, ast, fingerprint, origin),
                None => {
                    self.unregister(key);
                },
            }
        }

        self.emit(PanelEvent::TemplateLoaded {
            metadata: EventMetadata::new(EVENT_SOURCE),
            key: key.to_string(),
            name,
        });
        self.announce_build(key, &artifact);
        artifact
    }

    fn store(
        &self,
        key: &SourceKey,
        fingerprint: Fingerprint,
        origin: EntryOrigin,
        artifact: &Arc<BuildArtifact>,
    ) {
        write(&self.inner.cache).insert(CacheEntry {
            key: key.clone(),
            fingerprint,
            artifact: Arc::clone(artifact),
            timestamp: Utc::now(),
            origin,
        });
    }

    fn announce_build(&self, key: &SourceKey, artifact: &BuildArtifact) {
        let metadata = EventMetadata::new(EVENT_SOURCE);
        if artifact.is_ok() {
            info!(
                key = %key,
                blocks = artifact.blocks_used.len(),
                warnings = artifact.warnings.len(),
                "Template built"
            );
            self.record(
                ActivityKind::Built,
                Some(key),
                format!(
                    "{} blocks, {} warnings",
                    artifact.blocks_used.len(),
                    artifact.warnings.len()
                ),
            );
            self.emit(PanelEvent::TemplateBuilt {
                metadata,
                key: key.to_string(),
                blocks_used: artifact.blocks_used.clone(),
                warnings: artifact.warnings.len(),
            });
        } else {
            warn!(
                key = %key,
                errors = artifact.errors.len(),
                fatal = artifact.is_fatal(),
                "Template built with errors"
            );
            self.record(
                ActivityKind::BuildFailed,
                Some(key),
                format!("{} errors", artifact.errors.len()),
            );
            self.emit(PanelEvent::TemplateError {
                metadata,
                key: key.to_string(),
                errors: artifact.errors.iter().map(ToString::to_string).collect(),
            });
        }
    }

    /// Record a parsed template and bind its event descriptors.
    fn register(
        &self,
        key: &SourceKey,
        ast: TemplateAst,
        fingerprint: Fingerprint,
        origin: EntryOrigin,
    ) {
        let ast = Arc::new(ast);
        let subscriptions = self.bind_events(key, &ast);
        write(&self.inner.loaded).insert(
            key.clone(),
            LoadedTemplate {
                ast,
                fingerprint,
                origin,
                loaded_at: Utc::now(),
            },
        );
        let previous = lock(&self.inner.bindings).insert(key.clone(), subscriptions);
        drop(previous);
    }

    fn unregister(&self, key: &SourceKey) -> bool {
        let removed = write(&self.inner.loaded).remove(key).is_some();
        let previous = lock(&self.inner.bindings).remove(key);
        drop(previous);
        removed
    }

    /// Subscribe each `events` descriptor through the bridge.
    fn bind_events(&self, key: &SourceKey, ast: &TemplateAst) -> Vec<BridgeSubscription> {
        if ast.events.is_empty() {
            return Vec::new();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No async runtime, template events left unbound");
            return Vec::new();
        };

        let bridge = self.inner.builder.bridge();
        ast.events
            .iter()
            .map(|descriptor| {
                let weak = Arc::downgrade(&self.inner);
                let runtime = runtime.clone();
                let key = key.clone();
                let action = descriptor.action.clone();
                let event = descriptor.event.clone();
                let handler: BridgeHandler = Arc::new(move |_payload: &Value| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    trace!(key = %key, event = %event, action = %action, "Bridge event received");
                    let cancel = inner.cancel.child_token();
                    let orchestrator = TemplateOrchestrator { inner };
                    let key = key.clone();
                    let action = action.clone();
                    runtime.spawn(async move {
                        let result = orchestrator
                            .dispatch_action(key.clone(), &action, cancel)
                            .await;
                        if let Err(e) = result {
                            warn!(
                                key = %key,
                                action = %action,
                                error = %e,
                                "Bound action failed to start"
                            );
                        }
                    });
                });
                bridge.subscribe(&descriptor.event, handler)
            })
            .collect()
    }

    /// Invalidate the template behind `path` and rebuild it if it was known.
    async fn refresh(&self, path: &Path) {
        let Some(key) = self.inner.source.key_for_path(path) else {
            debug!(path = %path.display(), "Path outside the template source");
            return;
        };

        let loaded = read(&self.inner.loaded).contains_key(&key);
        let cached = self.invalidate(&key);
        if !self.inner.options.hot_reload || !(loaded || cached) {
            return;
        }

        debug!(key = %key, "Hot reloading template");
        if let Err(e) = self.load_coalesced(key.clone(), true).await {
            warn!(key = %key, error = %e, "Hot reload failed");
        }
    }

    fn evict(&self, key: &SourceKey) {
        self.supersede(key);
        let cached = write(&self.inner.cache).remove(key).is_some();
        let loaded = self.unregister(key);
        if cached || loaded {
            info!(key = %key, "Template evicted");
            self.record(ActivityKind::Evicted, Some(key), "source removed");
        }
    }

    fn emit(&self, event: PanelEvent) {
        trace!(event_type = event.event_type(), "Emitting");
        self.inner.bus.emit(event);
    }

    fn record(&self, kind: ActivityKind, key: Option<&SourceKey>, detail: impl Into<String>) {
        lock(&self.inner.activity).record(kind, key, detail);
    }
}
