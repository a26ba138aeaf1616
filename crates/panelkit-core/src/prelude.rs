//! Prelude module - commonly used types for convenient import.
//!
//! Use `use panelkit_core::prelude::*;` to import all essential types.

// Node tree
pub use crate::{IconSpec, Props, RenderKind, RenderNode};

// State and expressions
pub use crate::{Interpolation, Scope, StateStore, evaluate_condition, interpolate, is_truthy};

// Bridge collaborator
pub use crate::{Bridge, BridgeError, BridgeHandler, BridgeResult, BridgeSubscription, PanelInfo};
