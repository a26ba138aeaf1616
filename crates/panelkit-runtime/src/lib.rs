//! panelkit Runtime - Template orchestrator.
//!
//! This crate provides:
//! - [`TemplateOrchestrator`], which caches build artifacts by source key,
//!   coalesces concurrent loads, and rebuilds on file changes
//! - [`TemplateSource`] with file ([`FsSource`]) and in-memory
//!   ([`MemorySource`]) implementations
//! - [`TemplateWatcher`], a debounced, content-hashing directory watcher
//! - [`ActionRunner`], which executes template actions as cancellable
//!   sequences
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use panelkit_blocks::CapabilityRegistry;
//! use panelkit_builder::ComponentBuilder;
//! use panelkit_core::NullBridge;
//! use panelkit_events::EventBus;
//! use panelkit_runtime::{FsSource, OrchestratorOptions, TemplateOrchestrator};
//!
//! # async fn example() -> Result<(), panelkit_runtime::RuntimeError> {
//! let builder = ComponentBuilder::new(
//!     Arc::new(CapabilityRegistry::new()),
//!     Arc::new(NullBridge::new("docs")),
//! );
//! let orchestrator = TemplateOrchestrator::new(
//!     Arc::new(FsSource::new("panels")),
//!     builder,
//!     EventBus::new(),
//!     OrchestratorOptions::default(),
//! );
//!
//! let artifact = orchestrator.load_template("hello.panel.yaml").await?;
//! println!("{} blocks", artifact.blocks_used.len());
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod actions;
mod cache;
mod error;
mod orchestrator;
mod source;
mod watcher;

pub use actions::{
    ActionError, ActionReport, ActionResult, ActionRunner, MAX_ACTION_DEPTH, SequenceState,
};
pub use cache::{ActivityEntry, ActivityKind, CacheEntry, EntryOrigin};
pub use error::{RuntimeError, RuntimeResult};
pub use orchestrator::{
    DEFAULT_ACTIVITY_LOG_CAPACITY, OrchestratorOptions, OrchestratorStatus, TemplateOrchestrator,
    TemplateSummary,
};
pub use source::{Fingerprint, FsSource, MemorySource, SourceKey, TemplateSource};
pub use watcher::{
    DEFAULT_DEBOUNCE, DEFAULT_EXTENSIONS, TemplateWatcher, WatchEvent, WatcherConfig, hash_file,
};
