//! Mock implementations for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use panelkit_core::{
    Bridge, BridgeError, BridgeHandler, BridgeResult, BridgeSubscription, PanelInfo,
};

type Handlers = HashMap<String, Vec<(u64, BridgeHandler)>>;

/// Mock implementation of the `Bridge` trait for testing.
///
/// Records every message, request, and file-open call. Assistant replies are
/// queued ahead of time; an empty queue answers with
/// [`BridgeError::Unsupported`]. Uses `std::sync::Mutex` internally so the
/// builder methods need no tokio runtime.
#[derive(Clone)]
pub struct MockBridge {
    panel: PanelInfo,
    /// Captured `(type, payload)` messages.
    sent: Arc<Mutex<Vec<(String, Value)>>>,
    /// Captured `(prompt, context)` assistant requests.
    prompts: Arc<Mutex<Vec<(String, Value)>>>,
    /// Queued assistant replies.
    replies: Arc<Mutex<VecDeque<BridgeResult<Value>>>>,
    /// Delay applied before each assistant reply.
    reply_delay: Option<Duration>,
    /// Captured file-open calls.
    opened: Arc<Mutex<Vec<(PathBuf, Option<u32>)>>>,
    /// Error returned by `send_message`, if set.
    send_failure: Option<BridgeError>,
    handlers: Arc<Mutex<Handlers>>,
    next_handler: Arc<AtomicU64>,
}

impl MockBridge {
    /// Create a new mock bridge for panel `test-panel`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            panel: PanelInfo {
                id: "test-panel".to_string(),
                title: Some("Test Panel".to_string()),
                visible: true,
            },
            sent: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            reply_delay: None,
            opened: Arc::new(Mutex::new(Vec::new())),
            send_failure: None,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_handler: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an assistant reply.
    #[must_use]
    pub fn with_ai_reply(self, reply: Value) -> Self {
        self.queue_ai_reply(Ok(reply));
        self
    }

    /// Queue an assistant failure.
    #[must_use]
    pub fn with_ai_error(self, error: BridgeError) -> Self {
        self.queue_ai_reply(Err(error));
        self
    }

    /// Delay every assistant reply.
    #[must_use]
    pub fn with_ai_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    /// Make every `send_message` call fail.
    #[must_use]
    pub fn with_send_failure(mut self, error: BridgeError) -> Self {
        self.send_failure = Some(error);
        self
    }

    /// Queue an assistant reply or failure.
    pub fn queue_ai_reply(&self, reply: BridgeResult<Value>) {
        if let Ok(mut guard) = self.replies.lock() {
            guard.push_back(reply);
        }
    }

    /// Messages sent so far.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<(String, Value)> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Types of the messages sent so far.
    #[must_use]
    pub fn sent_types(&self) -> Vec<String> {
        self.sent_messages().into_iter().map(|(t, _)| t).collect()
    }

    /// Assistant requests made so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<(String, Value)> {
        self.prompts.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// File-open calls made so far.
    #[must_use]
    pub fn opened_files(&self) -> Vec<(PathBuf, Option<u32>)> {
        self.opened.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Number of live subscriptions for `event`.
    #[must_use]
    pub fn subscription_count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .map(|g| g.get(event).map_or(0, Vec::len))
            .unwrap_or_default()
    }

    /// Simulate the host emitting `event`. Returns the number of handlers
    /// invoked.
    pub fn fire(&self, event: &str, payload: &Value) -> usize {
        // Clone the handlers out so a handler may subscribe or unsubscribe.
        let handlers: Vec<BridgeHandler> = self
            .handlers
            .lock()
            .map(|g| {
                g.get(event)
                    .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }
}

impl std::fmt::Debug for MockBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBridge")
            .field("panel", &self.panel.id)
            .field("sent", &self.sent_messages().len())
            .field("prompts", &self.prompts().len())
            .finish_non_exhaustive()
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bridge for MockBridge {
    fn send_message(&self, message_type: &str, data: Value) -> BridgeResult<()> {
        if let Some(error) = &self.send_failure {
            return Err(error.clone());
        }
        if let Ok(mut guard) = self.sent.lock() {
            guard.push((message_type.to_string(), data));
        }
        Ok(())
    }

    fn subscribe(&self, event: &str, handler: BridgeHandler) -> BridgeSubscription {
        let id = self.next_handler.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.handlers.lock() {
            guard
                .entry(event.to_string())
                .or_default()
                .push((id, handler));
        }
        let handlers = Arc::clone(&self.handlers);
        let event = event.to_string();
        BridgeSubscription::new(move || {
            if let Ok(mut guard) = handlers.lock()
                && let Some(list) = guard.get_mut(&event)
            {
                list.retain(|(h, _)| *h != id);
                if list.is_empty() {
                    guard.remove(&event);
                }
            }
        })
    }

    fn panel(&self) -> PanelInfo {
        self.panel.clone()
    }

    async fn request_ai(&self, prompt: &str, context: &Value) -> BridgeResult<Value> {
        if let Ok(mut guard) = self.prompts.lock() {
            guard.push((prompt.to_string(), context.clone()));
        }
        if let Some(delay) = self.reply_delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut g| g.pop_front())
            .unwrap_or_else(|| Err(BridgeError::Unsupported("no queued reply".to_string())))
    }

    fn open_file(&self, path: &Path, line: Option<u32>) -> BridgeResult<()> {
        if let Ok(mut guard) = self.opened.lock() {
            guard.push((path.to_path_buf(), line));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_queued_replies_in_order() {
        let bridge = MockBridge::new()
            .with_ai_reply(Value::from("first"))
            .with_ai_error(BridgeError::Disconnected);

        assert_eq!(
            bridge.request_ai("a", &Value::Null).await.ok(),
            Some(Value::from("first"))
        );
        assert!(matches!(
            bridge.request_ai("b", &Value::Null).await,
            Err(BridgeError::Disconnected)
        ));
        assert!(bridge.request_ai("c", &Value::Null).await.is_err());
        assert_eq!(bridge.prompts().len(), 3);
    }

    #[test]
    fn test_subscriptions_fire_until_dropped() {
        let bridge = MockBridge::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = bridge.subscribe(
            "focus",
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(bridge.fire("focus", &Value::Null), 1);
        assert_eq!(bridge.subscription_count("focus"), 1);
        drop(sub);
        assert_eq!(bridge.fire("focus", &Value::Null), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_records_messages() {
        let bridge = MockBridge::new();
        bridge.send_message("refresh", Value::from(1)).ok();
        assert_eq!(bridge.sent_types(), ["refresh"]);

        let failing = MockBridge::new().with_send_failure(BridgeError::Disconnected);
        assert!(failing.send_message("refresh", Value::Null).is_err());
    }
}
