//! Event types for the panelkit event bus.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Correlation ID for tracing related events, e.g. all events of one
    /// action run.
    pub correlation_id: Option<Uuid>,
    /// Source component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            source: source.into(),
        }
    }

    /// Set correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// All events emitted by the template pipeline.
///
/// Template keys are the textual form of the orchestrator's source keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelEvent {
    // ========== Template lifecycle ==========
    /// A template was read and parsed.
    TemplateLoaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// Template name, when the document declared one.
        name: Option<String>,
    },

    /// A template built with no errors.
    TemplateBuilt {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// Capability ids rendered.
        blocks_used: Vec<String>,
        /// Number of warnings.
        warnings: usize,
    },

    /// A template built with errors.
    TemplateError {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// Error descriptions.
        errors: Vec<String>,
    },

    // ========== Source files ==========
    /// A template file appeared.
    FileAdded {
        /// Event metadata.
        metadata: EventMetadata,
        /// File path.
        path: PathBuf,
    },

    /// A template file's content changed.
    FileChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// File path.
        path: PathBuf,
    },

    /// A template file was removed and its cache entry evicted.
    FileRemoved {
        /// Event metadata.
        metadata: EventMetadata,
        /// File path.
        path: PathBuf,
    },

    // ========== Cache ==========
    /// Every cache entry was dropped.
    CacheCleared {
        /// Event metadata.
        metadata: EventMetadata,
        /// Number of entries dropped.
        entries: usize,
    },

    // ========== State & actions ==========
    /// An action changed a template's state.
    StateChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// State revision after the change.
        revision: u64,
    },

    /// An action started.
    ActionStarted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// Action name.
        action: String,
    },

    /// An action finished successfully.
    ActionCompleted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// Action name.
        action: String,
    },

    /// An action failed.
    ActionFailed {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// Action name.
        action: String,
        /// Failure description.
        error: String,
    },

    /// An action was abandoned before it finished.
    ActionCancelled {
        /// Event metadata.
        metadata: EventMetadata,
        /// Template key.
        key: String,
        /// Action name.
        action: String,
        /// Steps discarded without running.
        skipped_steps: usize,
    },
}

impl PanelEvent {
    /// Event name listeners subscribe to, e.g. `template:built`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TemplateLoaded { .. } => "template:loaded",
            Self::TemplateBuilt { .. } => "template:built",
            Self::TemplateError { .. } => "template:error",
            Self::FileAdded { .. } => "file:added",
            Self::FileChanged { .. } => "file:changed",
            Self::FileRemoved { .. } => "file:removed",
            Self::CacheCleared { .. } => "cache:cleared",
            Self::StateChanged { .. } => "state:changed",
            Self::ActionStarted { .. } => "action:started",
            Self::ActionCompleted { .. } => "action:completed",
            Self::ActionFailed { .. } => "action:failed",
            Self::ActionCancelled { .. } => "action:cancelled",
        }
    }

    /// Get the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::TemplateLoaded { metadata, .. }
            | Self::TemplateBuilt { metadata, .. }
            | Self::TemplateError { metadata, .. }
            | Self::FileAdded { metadata, .. }
            | Self::FileChanged { metadata, .. }
            | Self::FileRemoved { metadata, .. }
            | Self::CacheCleared { metadata, .. }
            | Self::StateChanged { metadata, .. }
            | Self::ActionStarted { metadata, .. }
            | Self::ActionCompleted { metadata, .. }
            | Self::ActionFailed { metadata, .. }
            | Self::ActionCancelled { metadata, .. } => metadata,
        }
    }

    /// Template key the event concerns, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::TemplateLoaded { key, .. }
            | Self::TemplateBuilt { key, .. }
            | Self::TemplateError { key, .. }
            | Self::StateChanged { key, .. }
            | Self::ActionStarted { key, .. }
            | Self::ActionCompleted { key, .. }
            | Self::ActionFailed { key, .. }
            | Self::ActionCancelled { key, .. } => Some(key),
            Self::FileAdded { .. }
            | Self::FileChanged { .. }
            | Self::FileRemoved { .. }
            | Self::CacheCleared { .. } => None,
        }
    }
}
