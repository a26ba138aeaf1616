//! Prelude module - commonly used types for convenient import.
//!
//! Use `use panelkit_events::prelude::*;` to import all essential types.

pub use crate::{EventBus, EventMetadata, EventReceiver, PanelEvent, Subscription};
