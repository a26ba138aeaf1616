//! The host communication surface.
//!
//! A [`Bridge`] connects a mini-app to whatever hosts it: an editor
//! extension, a desktop shell, a test harness. Capabilities receive it at
//! render time and the action runner uses it for message dispatch and
//! external requests. The core calls exactly this surface and nothing else.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};

/// Callback invoked when the host emits a bridge event.
pub type BridgeHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of the panel hosting the mini-app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelInfo {
    /// Host-assigned panel identifier.
    pub id: String,
    /// Panel title, if the host shows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Whether the panel is currently visible.
    #[serde(default)]
    pub visible: bool,
}

/// Host communication contract.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Send a fire-and-forget message to the host.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the host cannot accept the message.
    fn send_message(&self, message_type: &str, data: Value) -> BridgeResult<()>;

    /// Listen for a host event. Dropping the returned subscription stops
    /// delivery.
    fn subscribe(&self, event: &str, handler: BridgeHandler) -> BridgeSubscription;

    /// Describe the hosting panel.
    fn panel(&self) -> PanelInfo;

    /// Ask the host's assistant backend for a response.
    ///
    /// # Errors
    ///
    /// The default implementation returns [`BridgeError::Unsupported`].
    async fn request_ai(&self, prompt: &str, context: &Value) -> BridgeResult<Value> {
        let _ = (prompt, context);
        Err(BridgeError::Unsupported("requestAI".to_owned()))
    }

    /// Ask the host to open a file, optionally at a line.
    ///
    /// # Errors
    ///
    /// The default implementation returns [`BridgeError::Unsupported`].
    fn open_file(&self, path: &Path, line: Option<u32>) -> BridgeResult<()> {
        let _ = (path, line);
        Err(BridgeError::Unsupported("openFile".to_owned()))
    }
}

/// Handle for a bridge event subscription.
///
/// The subscription ends when [`unsubscribe`](Self::unsubscribe) is called or
/// the handle is dropped.
pub struct BridgeSubscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl BridgeSubscription {
    /// Wrap a closure that tears down the subscription.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down.
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// End the subscription now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for BridgeSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for BridgeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A bridge that accepts messages and discards them.
///
/// Used when a mini-app is built outside any host, e.g. by `panelkit build`.
#[derive(Debug, Clone, Default)]
pub struct NullBridge {
    panel: PanelInfo,
}

impl NullBridge {
    /// Create a null bridge reporting the given panel id.
    #[must_use]
    pub fn new(panel_id: impl Into<String>) -> Self {
        Self {
            panel: PanelInfo {
                id: panel_id.into(),
                title: None,
                visible: false,
            },
        }
    }
}

#[async_trait]
impl Bridge for NullBridge {
    fn send_message(&self, message_type: &str, _data: Value) -> BridgeResult<()> {
        tracing::trace!(message_type, "Null bridge dropped message");
        Ok(())
    }

    fn subscribe(&self, _event: &str, _handler: BridgeHandler) -> BridgeSubscription {
        BridgeSubscription::noop()
    }

    fn panel(&self) -> PanelInfo {
        self.panel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_runs_cancel_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = BridgeSubscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_cancels_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        {
            let _sub = BridgeSubscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_bridge_optional_operations_unsupported() {
        let bridge = NullBridge::new("panel-1");

        assert!(bridge.send_message("ping", Value::Null).is_ok());
        assert_eq!(bridge.panel().id, "panel-1");
        assert!(matches!(
            bridge.request_ai("hi", &Value::Null).await,
            Err(BridgeError::Unsupported(_))
        ));
        assert!(bridge.open_file(Path::new("a.rs"), Some(1)).is_err());
    }
}
