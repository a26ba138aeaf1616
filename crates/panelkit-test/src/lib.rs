//! panelkit Test - Shared test utilities for panelkit.
//!
//! This crate provides a mock [`Bridge`](panelkit_core::Bridge), canned
//! capabilities, template fixtures, and scratch directories that can be used
//! across panelkit crates as a dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! panelkit-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use panelkit_test::{MockBridge, fixtures, registry_with};
//!
//! let registry = registry_with(&["panel", "text", "button"]);
//! let bridge = MockBridge::new().with_ai_reply(serde_json::json!({ "text": "hi" }));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod capabilities;
pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use capabilities::{counting, element, failing, panicking, registry_with};
pub use harness::{PanelDir, setup_test_logging};
pub use mocks::MockBridge;
