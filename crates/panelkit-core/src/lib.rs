//! panelkit Core - Shared value types and collaborator traits.
//!
//! This crate provides:
//! - [`RenderNode`], the bound node tree handed to the rendering collaborator
//! - [`StateStore`], the mutable state snapshot templates read from
//! - `{{ state.path }}` interpolation and truthy condition evaluation
//! - The [`Bridge`] trait describing the host communication surface
//!
//! Everything here is free of template parsing and registry concerns so that
//! the parser, the registry, and the builder can all depend on it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod bridge;
pub mod error;
pub mod expr;
pub mod node;
pub mod state;

pub use bridge::{Bridge, BridgeHandler, BridgeSubscription, NullBridge, PanelInfo};
pub use error::{BridgeError, BridgeResult, ExprError, StateError, StateResult};
pub use expr::{Interpolation, Scope, evaluate_condition, interpolate, is_truthy};
pub use node::{IconSpec, Props, RenderKind, RenderNode};
pub use state::StateStore;
