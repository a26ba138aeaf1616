//! Integration tests for watcher-driven invalidation and rebuilds.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use panelkit_builder::ComponentBuilder;
use panelkit_events::{EventBus, PanelEvent};
use panelkit_runtime::{
    ActivityKind, Fingerprint, FsSource, OrchestratorOptions, RuntimeError, SourceKey,
    TemplateOrchestrator, TemplateSource, WatchEvent,
};
use panelkit_test::{MockBridge, PanelDir, fixtures, registry_with, setup_test_logging};

struct Harness {
    dir: PanelDir,
    orchestrator: TemplateOrchestrator,
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl Harness {
    fn new(hot_reload: bool) -> Self {
        setup_test_logging("panelkit_runtime=debug");
        let dir = PanelDir::new();
        let builder = ComponentBuilder::new(
            registry_with(&["panel", "text", "button"]),
            Arc::new(MockBridge::new()),
        );
        let options = OrchestratorOptions {
            hot_reload,
            debounce: Duration::from_millis(50),
            ..OrchestratorOptions::default()
        };
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _subscription = bus.subscribe_all(move |event: &PanelEvent| {
            sink.lock().unwrap().push(event.event_type());
        });

        let orchestrator =
            TemplateOrchestrator::new(Arc::new(FsSource::new(dir.path())), builder, bus, options);
        Self {
            dir,
            orchestrator,
            events,
        }
    }

    fn take_events(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[tokio::test]
async fn test_change_rebuilds_cached_template() {
    let h = Harness::new(true);
    h.dir.write("a.panel.yaml", &fixtures::simple("a"));
    h.orchestrator.load_template("a.panel.yaml").await.unwrap();
    h.take_events();

    let path = h.dir.write("a.panel.yaml", &fixtures::simple("rewritten"));
    h.orchestrator
        .handle_watch_event(WatchEvent::Changed(path))
        .await;

    assert_eq!(
        h.take_events(),
        vec!["file:changed", "template:loaded", "template:built"]
    );
    let artifact = h
        .orchestrator
        .cached(&SourceKey::new("a.panel.yaml"))
        .unwrap();
    assert_eq!(artifact.root.children[0].props["value"], json!("rewritten"));
}

#[tokio::test]
async fn test_change_without_hot_reload_only_invalidates() {
    let h = Harness::new(false);
    h.dir.write("a.panel.yaml", &fixtures::simple("a"));
    h.orchestrator.load_template("a.panel.yaml").await.unwrap();
    h.take_events();

    let path = h.dir.write("a.panel.yaml", &fixtures::simple("rewritten"));
    h.orchestrator
        .handle_watch_event(WatchEvent::Changed(path))
        .await;

    assert_eq!(h.take_events(), vec!["file:changed"]);
    assert_eq!(h.orchestrator.status().cached, 0);

    let artifact = h.orchestrator.load_template("a.panel.yaml").await.unwrap();
    assert_eq!(artifact.root.children[0].props["value"], json!("rewritten"));
}

#[tokio::test]
async fn test_new_files_are_not_built_eagerly() {
    let h = Harness::new(true);
    let path = h.dir.write("fresh.panel.yaml", &fixtures::simple("fresh"));

    h.orchestrator
        .handle_watch_event(WatchEvent::Added(path))
        .await;

    assert_eq!(h.take_events(), vec!["file:added"]);
    assert_eq!(h.orchestrator.status().cached, 0);
}

#[tokio::test]
async fn test_removal_evicts_entry_and_record() {
    let h = Harness::new(true);
    h.dir.write("nested/b.panel.yaml", fixtures::COUNTER);
    h.orchestrator
        .load_template("nested/b.panel.yaml")
        .await
        .unwrap();
    assert_eq!(h.orchestrator.status().loaded, 1);
    h.take_events();

    h.dir.remove("nested/b.panel.yaml");
    h.orchestrator
        .handle_watch_event(WatchEvent::Removed(h.dir.file("nested/b.panel.yaml")))
        .await;

    assert_eq!(h.take_events(), vec!["file:removed"]);
    let status = h.orchestrator.status();
    assert_eq!(status.cached, 0);
    assert_eq!(status.loaded, 0);
    assert!(matches!(
        h.orchestrator.load_template("nested/b.panel.yaml").await,
        Err(RuntimeError::SourceUnavailable { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_drives_hot_reload() {
    let h = Harness::new(true);
    h.dir.write("live.panel.yaml", &fixtures::simple("before"));
    h.orchestrator.load_template("live.panel.yaml").await.unwrap();

    h.orchestrator.start_watching(h.dir.path()).await.unwrap();
    assert!(matches!(
        h.orchestrator.start_watching(h.dir.path()).await,
        Err(RuntimeError::Watcher(_))
    ));
    assert_eq!(
        h.orchestrator.status().watching.as_deref(),
        Some(h.dir.path())
    );

    let mut built = h.orchestrator.bus().receiver_for("template:built");
    h.dir.write("live.panel.yaml", &fixtures::simple("after-change"));

    let event = tokio::time::timeout(Duration::from_secs(10), built.recv())
        .await
        .expect("no rebuild after file change")
        .unwrap();
    assert!(matches!(&*event, PanelEvent::TemplateBuilt { key, .. } if key == "live.panel.yaml"));

    let artifact = h
        .orchestrator
        .cached(&SourceKey::new("live.panel.yaml"))
        .unwrap();
    assert_eq!(
        artifact.root.children[0].props["value"],
        json!("after-change")
    );

    h.orchestrator.shutdown().await;
    assert_eq!(h.orchestrator.status().watching, None);
}

/// Single-template source that takes its text when a read starts and only
/// returns it after that read's scripted delay.
struct SlowReadSource {
    text: Mutex<String>,
    delays: Mutex<VecDeque<Duration>>,
}

impl SlowReadSource {
    fn new(text: String, delays: &[u64]) -> Self {
        Self {
            text: Mutex::new(text),
            delays: Mutex::new(delays.iter().copied().map(Duration::from_millis).collect()),
        }
    }

    fn set(&self, text: String) {
        *self.text.lock().unwrap() = text;
    }
}

#[async_trait]
impl TemplateSource for SlowReadSource {
    async fn read(&self, _key: &SourceKey) -> io::Result<String> {
        let text = self.text.lock().unwrap().clone();
        let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
        tokio::time::sleep(delay).await;
        Ok(text)
    }

    async fn fingerprint(&self, _key: &SourceKey) -> io::Result<Fingerprint> {
        Ok(Fingerprint::of_text(&self.text.lock().unwrap()))
    }

    fn key_for_path(&self, path: &Path) -> Option<SourceKey> {
        path.to_str().map(SourceKey::new)
    }
}

fn cached_value(orchestrator: &TemplateOrchestrator, key: &SourceKey) -> serde_json::Value {
    let artifact = orchestrator.cached(key).unwrap();
    artifact.root.children[0].props["value"].clone()
}

#[tokio::test]
async fn test_overtaken_build_does_not_replace_hot_reload() {
    let source = Arc::new(SlowReadSource::new(fixtures::simple("v0"), &[0, 300, 0]));
    let builder = ComponentBuilder::new(
        registry_with(&["panel", "text"]),
        Arc::new(MockBridge::new()),
    );
    let orchestrator = TemplateOrchestrator::new(
        Arc::clone(&source) as Arc<dyn TemplateSource>,
        builder,
        EventBus::new(),
        OrchestratorOptions::default(),
    );
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _subscription = orchestrator.bus().subscribe_all(move |event: &PanelEvent| {
        sink.lock().unwrap().push(event.event_type());
    });
    let key = SourceKey::new("live");

    orchestrator.load_template(key.clone()).await.unwrap();
    events.lock().unwrap().clear();

    source.set(fixtures::simple("v1"));
    let slow = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let key = key.clone();
        async move { orchestrator.reload_template(key).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(orchestrator.status().in_flight, 1);

    source.set(fixtures::simple("v2"));
    orchestrator
        .handle_watch_event(WatchEvent::Changed(PathBuf::from("live")))
        .await;
    assert_eq!(cached_value(&orchestrator, &key), json!("v2"));

    // The overtaken reload still answers its own caller.
    let overtaken = slow.await.unwrap().unwrap();
    assert_eq!(overtaken.root.children[0].props["value"], json!("v1"));

    assert_eq!(cached_value(&orchestrator, &key), json!("v2"));
    assert_eq!(orchestrator.status().templates[0].name, "v2");
    assert_eq!(
        *events.lock().unwrap(),
        vec!["file:changed", "template:loaded", "template:built"]
    );
    assert_eq!(
        orchestrator.status().activity[0].kind,
        ActivityKind::Superseded
    );
}
