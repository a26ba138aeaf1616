//! Runtime error types.

use thiserror::Error;

use crate::actions::ActionError;
use crate::source::SourceKey;

/// Errors surfaced at the orchestrator boundary.
///
/// Build problems are never errors here: they travel inside the
/// [`BuildArtifact`](panelkit_builder::BuildArtifact). These variants cover
/// collaborator failures and misuse. The type is `Clone` so a single
/// coalesced failure can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The template source could not be read.
    #[error("Template source unavailable for {key}: {message}")]
    SourceUnavailable {
        /// The source key.
        key: SourceKey,
        /// Underlying error description.
        message: String,
    },

    /// No loaded template is registered under the key.
    #[error("Template not loaded: {key}")]
    NotLoaded {
        /// The source key.
        key: SourceKey,
    },

    /// The build task ended without producing an artifact.
    #[error("Build task for {key} aborted: {message}")]
    BuildAborted {
        /// The source key.
        key: SourceKey,
        /// Join error description.
        message: String,
    },

    /// An action could not be started.
    #[error("Action on {key} rejected: {error}")]
    Action {
        /// The source key.
        key: SourceKey,
        /// Why the runner refused it.
        #[source]
        error: ActionError,
    },

    /// The file watcher could not be started.
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// The orchestrator has been shut down.
    #[error("Orchestrator is shut down")]
    ShutDown,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
