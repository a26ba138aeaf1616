//! Action runner.
//!
//! Runs a template's named actions against a shared [`StateStore`]. Every
//! run is an explicit state machine ([`SequenceState`]) with a
//! [`CancellationToken`] checked before each step and raced against every
//! bridge request. A run that is cancelled, or whose future is dropped
//! mid-flight, discards its queued steps and emits `action:cancelled`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use panelkit_core::state::merge_values;
use panelkit_core::{
    Bridge, BridgeError, Scope, StateError, StateStore, evaluate_condition, interpolate,
};
use panelkit_events::{EventBus, EventMetadata, PanelEvent};
use panelkit_template::{ActionNode, ActionRef, Branch};

/// Deepest chain of named references one run may follow.
pub const MAX_ACTION_DEPTH: usize = 16;

const EVENT_SOURCE: &str = "panelkit-runtime";

/// Errors that stop an action run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// A referenced action is not defined.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// A state update failed.
    #[error("state update failed: {0}")]
    State(#[from] StateError),

    /// The bridge rejected a message or request.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Named references nest deeper than [`MAX_ACTION_DEPTH`].
    #[error("action '{action}' exceeds the nesting limit of {limit}")]
    DepthExceeded {
        /// The action being entered.
        action: String,
        /// The limit.
        limit: usize,
    },

    /// The run was cancelled.
    #[error("action cancelled")]
    Cancelled,
}

/// Result type for action runs.
pub type ActionResult<T> = Result<T, ActionError>;

/// Lifecycle of one action run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    /// Created, not started.
    Pending,
    /// Executing steps.
    Running,
    /// Every step finished.
    Succeeded,
    /// A step failed; later steps were skipped.
    Failed,
    /// Cancelled or abandoned; queued steps were discarded.
    Cancelled,
}

impl SequenceState {
    /// Whether this state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    /// The action that was run.
    pub action: String,
    /// Terminal state.
    pub state: SequenceState,
    /// Steps executed.
    pub steps_run: usize,
    /// Queued steps discarded by cancellation.
    pub skipped_steps: usize,
    /// Whether the run wrote to the state store.
    pub state_changed: bool,
    /// Failure description for failed runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Step counters shared between a run and its drop guard.
#[derive(Debug, Default)]
struct Progress {
    queued: AtomicUsize,
    run: AtomicUsize,
}

impl Progress {
    fn reset(&self) {
        self.queued.store(0, Ordering::Relaxed);
        self.run.store(0, Ordering::Relaxed);
    }

    fn enqueue(&self, steps: usize) {
        self.queued.fetch_add(steps, Ordering::Relaxed);
    }

    /// A queued sequence step is starting.
    fn dequeue(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |q| {
                Some(q.saturating_sub(1))
            });
    }

    /// A state update, message, or request executed.
    fn ran(&self) {
        self.run.fetch_add(1, Ordering::Relaxed);
    }

    fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    fn steps_run(&self) -> usize {
        self.run.load(Ordering::Relaxed)
    }
}

/// Emits `action:cancelled` if the run is dropped while still running.
struct RunGuard<'a> {
    bus: &'a EventBus,
    key: &'a str,
    action: &'a str,
    run_id: Uuid,
    progress: &'a Progress,
    state: SequenceState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.state == SequenceState::Running {
            self.state = SequenceState::Cancelled;
            let skipped = self.progress.queued();
            warn!(
                key = %self.key,
                action = %self.action,
                skipped_steps = skipped,
                "Action abandoned mid-flight"
            );
            self.bus.emit(PanelEvent::ActionCancelled {
                metadata: EventMetadata::new(EVENT_SOURCE).with_correlation_id(self.run_id),
                key: self.key.to_owned(),
                action: self.action.to_owned(),
                skipped_steps: skipped,
            });
        }
    }
}

/// Runs the actions of one template.
pub struct ActionRunner<'a> {
    key: &'a str,
    actions: &'a BTreeMap<String, ActionNode>,
    defaults: &'a Value,
    state: &'a StateStore,
    bridge: &'a dyn Bridge,
    bus: &'a EventBus,
    cancel: CancellationToken,
    progress: Progress,
}

impl fmt::Debug for ActionRunner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRunner")
            .field("key", &self.key)
            .field("actions", &self.actions.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<'a> ActionRunner<'a> {
    /// Create a runner.
    ///
    /// `defaults` is the template's declared state, visible to expressions
    /// under whatever the store holds.
    #[must_use]
    pub fn new(
        key: &'a str,
        actions: &'a BTreeMap<String, ActionNode>,
        defaults: &'a Value,
        state: &'a StateStore,
        bridge: &'a dyn Bridge,
        bus: &'a EventBus,
    ) -> Self {
        Self {
            key,
            actions,
            defaults,
            state,
            bridge,
            bus,
            cancel: CancellationToken::new(),
            progress: Progress::default(),
        }
    }

    /// Use `cancel` as this run's cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the named action to completion.
    ///
    /// Emits `action:started` and exactly one of `action:completed`,
    /// `action:failed`, or `action:cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::UnknownAction`] without emitting anything if
    /// `name` is not defined. Step failures are reported in the
    /// [`ActionReport`], not as errors.
    pub async fn run(&self, name: &str) -> ActionResult<ActionReport> {
        if !self.actions.contains_key(name) {
            return Err(ActionError::UnknownAction(name.to_owned()));
        }

        self.progress.reset();
        let run_id = Uuid::new_v4();
        let meta = || EventMetadata::new(EVENT_SOURCE).with_correlation_id(run_id);
        let revision = self.state.revision();

        let mut guard = RunGuard {
            bus: self.bus,
            key: self.key,
            action: name,
            run_id,
            progress: &self.progress,
            state: SequenceState::Pending,
        };

        self.bus.emit(PanelEvent::ActionStarted {
            metadata: meta(),
            key: self.key.to_owned(),
            action: name.to_owned(),
        });
        guard.state = SequenceState::Running;
        debug!(key = %self.key, action = %name, "Action started");

        let root = [ActionRef::Named(name.to_owned())];
        let outcome = self.run_steps(&root, None, 0).await;

        let state = match &outcome {
            Ok(()) => SequenceState::Succeeded,
            Err(ActionError::Cancelled) => SequenceState::Cancelled,
            Err(_) => SequenceState::Failed,
        };
        guard.state = state;

        let skipped = if state == SequenceState::Cancelled {
            self.progress.queued()
        } else {
            0
        };

        let event = match &outcome {
            Ok(()) => PanelEvent::ActionCompleted {
                metadata: meta(),
                key: self.key.to_owned(),
                action: name.to_owned(),
            },
            Err(ActionError::Cancelled) => PanelEvent::ActionCancelled {
                metadata: meta(),
                key: self.key.to_owned(),
                action: name.to_owned(),
                skipped_steps: skipped,
            },
            Err(e) => PanelEvent::ActionFailed {
                metadata: meta(),
                key: self.key.to_owned(),
                action: name.to_owned(),
                error: e.to_string(),
            },
        };
        self.bus.emit(event);

        info!(
            key = %self.key,
            action = %name,
            state = %state,
            steps = self.progress.steps_run(),
            "Action finished"
        );

        Ok(ActionReport {
            action: name.to_owned(),
            state,
            steps_run: self.progress.steps_run(),
            skipped_steps: skipped,
            state_changed: self.state.revision() != revision,
            error: outcome.err().filter(|e| *e != ActionError::Cancelled).map(|e| e.to_string()),
        })
    }

    /// Current state with the template defaults underneath.
    fn scope_state(&self) -> Value {
        let mut merged = self.defaults.clone();
        merge_values(&mut merged, &self.state.snapshot());
        merged
    }

    fn check_cancelled(&self) -> ActionResult<()> {
        if self.cancel.is_cancelled() {
            Err(ActionError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn run_named<'s>(
        &'s self,
        name: &'s str,
        response: Option<&'s Value>,
        depth: usize,
    ) -> BoxFuture<'s, ActionResult<()>> {
        async move {
            if depth >= MAX_ACTION_DEPTH {
                return Err(ActionError::DepthExceeded {
                    action: name.to_owned(),
                    limit: MAX_ACTION_DEPTH,
                });
            }
            let action = self
                .actions
                .get(name)
                .ok_or_else(|| ActionError::UnknownAction(name.to_owned()))?;
            self.run_node(action, response, depth.saturating_add(1)).await
        }
        .boxed()
    }

    fn run_ref<'s>(
        &'s self,
        action: &'s ActionRef,
        response: Option<&'s Value>,
        depth: usize,
    ) -> BoxFuture<'s, ActionResult<()>> {
        match action {
            ActionRef::Named(name) => self.run_named(name, response, depth),
            ActionRef::Inline(node) => self.run_node(node, response, depth),
        }
    }

    fn run_node<'s>(
        &'s self,
        node: &'s ActionNode,
        response: Option<&'s Value>,
        depth: usize,
    ) -> BoxFuture<'s, ActionResult<()>> {
        async move {
            match node {
                ActionNode::StateUpdate { path, value } => {
                    self.check_cancelled()?;
                    self.progress.ran();
                    let value = self.interpolated(value, response);
                    self.state.set(path, value)?;
                    Ok(())
                },
                ActionNode::MessageDispatch {
                    message_type,
                    payload,
                } => {
                    self.check_cancelled()?;
                    self.progress.ran();
                    let payload = self.interpolated(payload, response);
                    self.bridge.send_message(message_type, payload)?;
                    Ok(())
                },
                ActionNode::ConditionalBranch { branches } => {
                    self.check_cancelled()?;
                    match self.pick_branch(branches, response) {
                        Some(branch) => self.run_ref(&branch.action, response, depth).await,
                        None => {
                            debug!(key = %self.key, "No branch matched");
                            Ok(())
                        },
                    }
                },
                ActionNode::ExternalRequest {
                    prompt,
                    context,
                    store_as,
                    on_success,
                } => {
                    self.check_cancelled()?;
                    self.progress.ran();
                    self.progress.enqueue(on_success.len());
                    let reply = self.request(prompt, context, response).await?;
                    if let Some(path) = store_as {
                        self.state.set(path, reply.clone())?;
                    }
                    self.run_queued(on_success, Some(&reply), depth).await
                },
                ActionNode::Sequence { steps } => self.run_steps(steps, response, depth).await,
            }
        }
        .boxed()
    }

    /// Run steps in order; the first failure stops the rest.
    async fn run_steps(
        &self,
        steps: &[ActionRef],
        response: Option<&Value>,
        depth: usize,
    ) -> ActionResult<()> {
        self.progress.enqueue(steps.len());
        self.run_queued(steps, response, depth).await
    }

    /// Like [`run_steps`](Self::run_steps) for steps already counted as
    /// queued.
    async fn run_queued(
        &self,
        steps: &[ActionRef],
        response: Option<&Value>,
        depth: usize,
    ) -> ActionResult<()> {
        for (index, step) in steps.iter().enumerate() {
            self.check_cancelled()?;
            self.progress.dequeue();
            if let Err(e) = self.run_ref(step, response, depth).await {
                if e != ActionError::Cancelled {
                    debug!(key = %self.key, step = index, error = %e, "Sequence step failed");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn pick_branch<'b>(
        &self,
        branches: &'b [Branch],
        response: Option<&Value>,
    ) -> Option<&'b Branch> {
        let state = self.scope_state();
        let scope = match response {
            Some(r) => Scope::new(&state).with_response(r),
            None => Scope::new(&state),
        };
        branches.iter().find(|branch| {
            evaluate_condition(&branch.when, &scope).unwrap_or_else(|e| {
                warn!(
                    key = %self.key,
                    when = %branch.when,
                    error = %e,
                    "Invalid branch condition, treating as true"
                );
                true
            })
        })
    }

    async fn request(
        &self,
        prompt: &str,
        context: &Value,
        response: Option<&Value>,
    ) -> ActionResult<Value> {
        let prompt = self.interpolated(&Value::String(prompt.to_owned()), response);
        let prompt = match prompt {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let context = self.interpolated(context, response);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ActionError::Cancelled),
            reply = self.bridge.request_ai(&prompt, &context) => reply.map_err(ActionError::from),
        }
    }

    fn interpolated(&self, value: &Value, response: Option<&Value>) -> Value {
        let state = self.scope_state();
        let scope = match response {
            Some(r) => Scope::new(&state).with_response(r),
            None => Scope::new(&state),
        };
        let result = interpolate(value, &scope);
        if !result.missing.is_empty() {
            debug!(key = %self.key, missing = ?result.missing, "Unresolved paths in action value");
        }
        result.value
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use panelkit_template::{TemplateAst, parse};
    use panelkit_test::fixtures;
    use panelkit_test::mocks::MockBridge;
    use serde_json::json;

    use super::*;

    fn ast(text: &str) -> TemplateAst {
        parse(text).ast.unwrap()
    }

    fn record(bus: &EventBus) -> Arc<Mutex<Vec<PanelEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        // Dropping the handle keeps the listener registered.
        let _ = bus.subscribe("action:*", move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        events
    }

    fn types(events: &Arc<Mutex<Vec<PanelEvent>>>) -> Vec<&'static str> {
        events.lock().unwrap().iter().map(PanelEvent::event_type).collect()
    }

    #[tokio::test]
    async fn test_then_chain_runs_in_order() {
        let ast = ast(fixtures::COUNTER);
        let state = StateStore::new();
        let bridge = MockBridge::new();
        let bus = EventBus::new();
        let events = record(&bus);

        let runner = ActionRunner::new("counter", &ast.actions, &ast.state, &state, &bridge, &bus);
        let report = runner.run("increment").await.unwrap();

        assert_eq!(report.state, SequenceState::Succeeded);
        assert_eq!(report.steps_run, 2);
        assert!(report.state_changed);
        assert_eq!(state.get("count"), Some(json!(1)));
        assert_eq!(
            bridge.sent_messages(),
            vec![("counted".to_owned(), json!({ "count": 1 }))]
        );
        assert_eq!(types(&events), vec!["action:started", "action:completed"]);
    }

    #[tokio::test]
    async fn test_failing_step_stops_sequence() {
        let ast = ast(
            r"
name: failing
bootstrap: panel
actions:
  go:
    - type: sendMessage
      message: first
    - type: setState
      path: reached
      value: true
",
        );
        let state = StateStore::new();
        let bridge = MockBridge::new().with_send_failure(BridgeError::Disconnected);
        let bus = EventBus::new();
        let events = record(&bus);

        let runner = ActionRunner::new("failing", &ast.actions, &ast.state, &state, &bridge, &bus);
        let report = runner.run("go").await.unwrap();

        assert_eq!(report.state, SequenceState::Failed);
        assert!(report.error.unwrap().contains("disconnected"));
        assert_eq!(state.get("reached"), None);
        assert_eq!(types(&events), vec!["action:started", "action:failed"]);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_skips_everything() {
        let ast = ast(fixtures::COUNTER);
        let state = StateStore::new();
        let bridge = MockBridge::new();
        let bus = EventBus::new();
        let events = record(&bus);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let runner = ActionRunner::new("counter", &ast.actions, &ast.state, &state, &bridge, &bus)
            .with_cancellation(cancel);
        let report = runner.run("increment").await.unwrap();

        assert_eq!(report.state, SequenceState::Cancelled);
        assert_eq!(report.steps_run, 0);
        assert_eq!(report.skipped_steps, 1);
        assert!(!report.state_changed);
        assert!(bridge.sent_messages().is_empty());

        let recorded = events.lock().unwrap();
        assert!(matches!(
            recorded.last(),
            Some(PanelEvent::ActionCancelled { skipped_steps: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_request_stores_reply_and_runs_on_success() {
        let ast = ast(fixtures::ASSISTANT);
        let state = StateStore::new();
        let bridge = MockBridge::new().with_ai_reply(json!({ "text": "short" }));
        let bus = EventBus::new();

        let runner =
            ActionRunner::new("assistant", &ast.actions, &ast.state, &state, &bridge, &bus);
        let report = runner.run("summarise").await.unwrap();

        assert_eq!(report.state, SequenceState::Succeeded);
        assert_eq!(
            bridge.prompts(),
            vec![("Summarise rust".to_owned(), json!({ "topic": "rust" }))]
        );
        assert_eq!(state.get("summary"), Some(json!({ "text": "short" })));
        assert_eq!(
            bridge.sent_messages(),
            vec![("summarised".to_owned(), json!({ "text": "short" }))]
        );
    }

    #[tokio::test]
    async fn test_cancel_during_request() {
        let ast = ast(fixtures::ASSISTANT);
        let state = StateStore::new();
        let bridge = MockBridge::new()
            .with_ai_reply(json!({ "text": "late" }))
            .with_ai_delay(Duration::from_secs(30));
        let bus = EventBus::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let runner =
            ActionRunner::new("assistant", &ast.actions, &ast.state, &state, &bridge, &bus)
                .with_cancellation(cancel);
        let report = runner.run("summarise").await.unwrap();

        assert_eq!(report.state, SequenceState::Cancelled);
        assert_eq!(report.skipped_steps, 1);
        assert_eq!(state.get("summary"), None);
        assert!(bridge.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_run_emits_cancelled() {
        let ast = ast(fixtures::ASSISTANT);
        let state = StateStore::new();
        let bridge = MockBridge::new()
            .with_ai_reply(json!({ "text": "late" }))
            .with_ai_delay(Duration::from_secs(30));
        let bus = EventBus::new();
        let events = record(&bus);

        let runner =
            ActionRunner::new("assistant", &ast.actions, &ast.state, &state, &bridge, &bus);
        let result =
            tokio::time::timeout(Duration::from_millis(20), runner.run("summarise")).await;
        assert!(result.is_err());

        assert_eq!(types(&events), vec!["action:started", "action:cancelled"]);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(PanelEvent::ActionCancelled { skipped_steps: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_branch_picks_first_truthy() {
        let ast = ast(
            r#"
name: branches
bootstrap: panel
state:
  mode: dark
actions:
  choose:
    type: conditional
    branches:
      - when: "{{ state.light }}"
        action: { type: sendMessage, message: light }
      - when: "{{ state.mode }}"
        action: { type: sendMessage, message: dark }
      - when: true
        action: { type: sendMessage, message: fallback }
"#,
        );
        let state = StateStore::new();
        let bridge = MockBridge::new();
        let bus = EventBus::new();

        let runner = ActionRunner::new("branches", &ast.actions, &ast.state, &state, &bridge, &bus);
        runner.run("choose").await.unwrap();

        assert_eq!(bridge.sent_types(), vec!["dark"]);
    }

    #[tokio::test]
    async fn test_self_reference_hits_depth_limit() {
        let ast = ast("name: loop\nbootstrap: panel\nactions:\n  again: [again]\n");
        let state = StateStore::new();
        let bridge = MockBridge::new();
        let bus = EventBus::new();

        let runner = ActionRunner::new("loop", &ast.actions, &ast.state, &state, &bridge, &bus);
        let report = runner.run("again").await.unwrap();

        assert_eq!(report.state, SequenceState::Failed);
        assert!(report.error.unwrap().contains("nesting limit"));
    }

    #[tokio::test]
    async fn test_unknown_action_emits_nothing() {
        let ast = ast(fixtures::MINIMAL);
        let state = StateStore::new();
        let bridge = MockBridge::new();
        let bus = EventBus::new();
        let events = record(&bus);

        let runner = ActionRunner::new("minimal", &ast.actions, &ast.state, &state, &bridge, &bus);
        let err = runner.run("nope").await.unwrap_err();

        assert_eq!(err, ActionError::UnknownAction("nope".to_owned()));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sequence_state_terminal() {
        assert!(!SequenceState::Pending.is_terminal());
        assert!(!SequenceState::Running.is_terminal());
        assert!(SequenceState::Succeeded.is_terminal());
        assert!(SequenceState::Cancelled.is_terminal());
        assert_eq!(SequenceState::Failed.to_string(), "failed");
    }
}
