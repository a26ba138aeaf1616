//! Prelude module - commonly used types for convenient import.
//!
//! Use `use panelkit_test::prelude::*;` to import all essential types.

pub use crate::fixtures;
pub use crate::{MockBridge, PanelDir, registry_with, setup_test_logging};
