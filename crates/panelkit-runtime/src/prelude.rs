//! Prelude module - commonly used types for convenient import.
//!
//! Use `use panelkit_runtime::prelude::*;` to import all essential types.

pub use crate::{
    ActionReport, FsSource, MemorySource, OrchestratorOptions, OrchestratorStatus, RuntimeError,
    RuntimeResult, SequenceState, SourceKey, TemplateOrchestrator, TemplateSource, WatchEvent,
};
