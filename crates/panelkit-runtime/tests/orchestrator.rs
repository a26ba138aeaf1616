//! Integration tests for template loading, caching, and coalescing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use panelkit_blocks::{BlockMetadata, CapabilityRegistry};
use panelkit_builder::ComponentBuilder;
use panelkit_events::{EventBus, PanelEvent};
use panelkit_runtime::{
    ActivityKind, MemorySource, OrchestratorOptions, RuntimeError, SourceKey,
    TemplateOrchestrator,
};
use panelkit_test::{MockBridge, counting, element, fixtures, registry_with};

/// Orchestrator over a memory source whose `panel` capability counts builds.
struct Harness {
    orchestrator: TemplateOrchestrator,
    source: Arc<MemorySource>,
    panel_builds: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl Harness {
    fn new(source: MemorySource) -> Self {
        Self::with_options(source, OrchestratorOptions::default())
    }

    fn with_options(source: MemorySource, options: OrchestratorOptions) -> Self {
        let panel_builds = Arc::new(AtomicUsize::new(0));
        let registry = CapabilityRegistry::new();
        registry
            .register(
                BlockMetadata::new("panel"),
                counting("panel", Arc::clone(&panel_builds)),
            )
            .unwrap();
        for id in ["root", "text", "button", "banner"] {
            registry
                .register(BlockMetadata::new(id), element(id))
                .unwrap();
        }

        let builder = ComponentBuilder::new(Arc::new(registry), Arc::new(MockBridge::new()));
        let source = Arc::new(source);
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _subscription = bus.subscribe_all(move |event: &PanelEvent| {
            sink.lock().unwrap().push(event.event_type());
        });

        Self {
            orchestrator: TemplateOrchestrator::new(
                Arc::clone(&source) as Arc<dyn panelkit_runtime::TemplateSource>,
                builder,
                bus,
                options,
            ),
            source,
            panel_builds,
            events,
        }
    }

    fn builds(&self) -> usize {
        self.panel_builds.load(Ordering::SeqCst)
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_share_one_build() {
    let source = MemorySource::new().with_read_delay(Duration::from_millis(50));
    source.insert("a", fixtures::simple("a"));
    let h = Harness::new(source);

    let (first, second) = tokio::join!(
        h.orchestrator.load_template("a"),
        h.orchestrator.load_template("a"),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.source.read_count(), 1);
    assert_eq!(h.builds(), 1);
    assert_eq!(h.orchestrator.status().in_flight, 0);
}

#[tokio::test]
async fn test_abandoned_load_still_fills_the_cache() {
    let source = MemorySource::new().with_read_delay(Duration::from_millis(100));
    source.insert("a", fixtures::simple("a"));
    let h = Harness::new(source);
    let mut built = h.orchestrator.bus().receiver_for("template:built");

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), h.orchestrator.load_template("a")).await;
    assert!(abandoned.is_err());

    tokio::time::timeout(Duration::from_secs(5), built.recv())
        .await
        .expect("build stopped with its caller")
        .unwrap();
    let artifact = h.orchestrator.load_template("a").await.unwrap();

    assert_eq!(artifact.root.children[0].props["value"], serde_json::json!("a"));
    assert_eq!(h.source.read_count(), 1);
    assert_eq!(h.builds(), 1);
    assert_eq!(h.orchestrator.status().activity[0].kind, ActivityKind::CacheHit);
}

#[tokio::test]
async fn test_unchanged_source_is_served_from_cache() {
    let source = MemorySource::new();
    source.insert("a", fixtures::simple("a"));
    let h = Harness::new(source);

    let first = h.orchestrator.load_template("a").await.unwrap();
    let second = h.orchestrator.load_template("a").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.source.read_count(), 1);
    assert_eq!(h.builds(), 1);
    assert_eq!(h.events(), vec!["template:loaded", "template:built"]);

    let activity = h.orchestrator.status().activity;
    assert_eq!(activity[0].kind, ActivityKind::CacheHit);
}

#[tokio::test]
async fn test_changed_source_rebuilds() {
    let source = MemorySource::new();
    source.insert("a", fixtures::simple("a"));
    let h = Harness::new(source);

    h.orchestrator.load_template("a").await.unwrap();
    h.source.insert("a", fixtures::simple("changed"));
    let artifact = h.orchestrator.load_template("a").await.unwrap();

    assert_eq!(h.source.read_count(), 2);
    assert_eq!(h.builds(), 2);
    assert_eq!(
        artifact.root.children[0].props["value"],
        serde_json::json!("changed")
    );
}

#[tokio::test]
async fn test_load_emits_loaded_then_built() {
    let source = MemorySource::new();
    source.insert("counter", fixtures::COUNTER);
    let h = Harness::new(source);

    let artifact = h.orchestrator.load_template("counter").await.unwrap();

    assert!(artifact.is_ok());
    assert_eq!(artifact.blocks_used, vec!["panel", "text", "button"]);
    assert_eq!(h.events(), vec!["template:loaded", "template:built"]);
}

#[tokio::test]
async fn test_malformed_template_yields_diagnostic_artifact() {
    let source = MemorySource::new();
    source.insert("bad", fixtures::MALFORMED);
    let h = Harness::new(source);

    let artifact = h.orchestrator.load_template("bad").await.unwrap();

    assert!(artifact.is_fatal());
    assert!(!artifact.errors.is_empty());
    assert_eq!(h.events(), vec!["template:loaded", "template:error"]);
    assert_eq!(h.orchestrator.status().loaded, 0);
    assert_eq!(h.orchestrator.status().cached, 1);
}

#[tokio::test]
async fn test_missing_capability_reports_template_error() {
    let source = MemorySource::new();
    source.insert("missing", fixtures::MISSING_BLOCK);
    let h = Harness::new(source);

    let artifact = h.orchestrator.load_template("missing").await.unwrap();

    assert!(!artifact.is_fatal());
    assert_eq!(artifact.errors.len(), 1);
    assert_eq!(artifact.root.children.len(), 3);
    assert_eq!(h.events(), vec!["template:loaded", "template:error"]);
}

#[tokio::test]
async fn test_unreadable_source_is_a_typed_error() {
    let h = Harness::new(MemorySource::new());

    let err = h.orchestrator.load_template("nowhere").await.unwrap_err();

    assert_eq!(
        err,
        RuntimeError::SourceUnavailable {
            key: SourceKey::new("nowhere"),
            message: "no template named 'nowhere'".to_owned(),
        }
    );
    assert!(h.events().is_empty());
    assert_eq!(
        h.orchestrator.status().activity[0].kind,
        ActivityKind::SourceError
    );
}

#[tokio::test]
async fn test_text_templates_always_rebuild_and_are_cached() {
    let h = Harness::new(MemorySource::new());
    let text = fixtures::simple("inline");

    h.orchestrator
        .load_template_from_text(&text, "inline")
        .unwrap();
    let second = h
        .orchestrator
        .load_template_from_text(&text, "inline")
        .unwrap();
    assert_eq!(h.builds(), 2);

    let cached = h.orchestrator.load_template("inline").await.unwrap();
    assert!(Arc::ptr_eq(&second, &cached));
    assert_eq!(h.source.read_count(), 0);
    assert_eq!(h.builds(), 2);
}

#[tokio::test]
async fn test_reload_and_invalidate_force_a_read() {
    let source = MemorySource::new();
    source.insert("a", fixtures::simple("a"));
    let h = Harness::new(source);

    h.orchestrator.load_template("a").await.unwrap();
    h.orchestrator.reload_template("a").await.unwrap();
    assert_eq!(h.source.read_count(), 2);

    assert!(h.orchestrator.invalidate(&SourceKey::new("a")));
    assert!(!h.orchestrator.invalidate(&SourceKey::new("a")));
    h.orchestrator.load_template("a").await.unwrap();
    assert_eq!(h.source.read_count(), 3);
}

#[tokio::test]
async fn test_clear_cache_keeps_loaded_records() {
    let source = MemorySource::new();
    source.insert("a", fixtures::simple("a"));
    source.insert("b", fixtures::simple("b"));
    let h = Harness::new(source);

    h.orchestrator.load_template("a").await.unwrap();
    h.orchestrator.load_template("b").await.unwrap();

    assert_eq!(h.orchestrator.clear_cache(), 2);
    let status = h.orchestrator.status();
    assert_eq!(status.cached, 0);
    assert_eq!(status.loaded, 2);
    assert_eq!(h.events().last(), Some(&"cache:cleared"));
}

#[tokio::test]
async fn test_status_activity_is_bounded() {
    let source = MemorySource::new();
    for key in ["a", "b", "c", "d", "e"] {
        source.insert(key, fixtures::simple(key));
    }
    let options = OrchestratorOptions {
        activity_log_capacity: 3,
        ..OrchestratorOptions::default()
    };
    let h = Harness::with_options(source, options);

    for key in ["a", "b", "c", "d", "e"] {
        h.orchestrator.load_template(key).await.unwrap();
    }

    let status = h.orchestrator.status();
    assert_eq!(status.loaded, 5);
    assert_eq!(status.activity.len(), 3);
    assert_eq!(status.activity[0].key, Some(SourceKey::new("e")));
    assert_eq!(status.activity[2].key, Some(SourceKey::new("c")));
    let keys: Vec<&str> = status.templates.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let source = MemorySource::new();
    source.insert("a", fixtures::simple("a"));
    let h = Harness::new(source);
    h.orchestrator.load_template("a").await.unwrap();

    h.orchestrator.shutdown().await;
    h.orchestrator.shutdown().await;

    let status = h.orchestrator.status();
    assert!(status.shut_down);
    assert_eq!(status.cached, 0);
    assert_eq!(status.loaded, 0);
    assert_eq!(h.orchestrator.bus().listener_count(), 0);
    assert_eq!(
        h.orchestrator.load_template("a").await.unwrap_err(),
        RuntimeError::ShutDown
    );
}

#[tokio::test]
async fn test_validate_and_analyze_use_the_builder_registry() {
    let builder = ComponentBuilder::new(
        registry_with(&["panel", "text"]),
        Arc::new(MockBridge::new()),
    );
    let orchestrator = TemplateOrchestrator::new(
        Arc::new(MemorySource::new()),
        builder,
        EventBus::new(),
        OrchestratorOptions::default(),
    );

    assert!(orchestrator.validate(&fixtures::simple("ok")).valid);
    let validation = orchestrator.validate(fixtures::MISSING_BLOCK);
    assert!(!validation.valid);
    assert_eq!(validation.errors.len(), 1);

    let analysis = orchestrator.analyze(fixtures::COUNTER);
    assert_eq!(analysis.component_count, 2);
    assert_eq!(analysis.action_count, 3);
    assert_eq!(analysis.event_count, 1);
}
