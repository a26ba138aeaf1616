//! panelkit Builder - Binds parsed templates to registered capabilities.
//!
//! [`ComponentBuilder`] turns a [`TemplateAst`](panelkit_template::TemplateAst)
//! and a state snapshot into a [`BuildArtifact`]: a renderable node tree, the
//! capability ids it used, and every [`BuildError`] and [`BuildWarning`]
//! found along the way. A build always yields something renderable; a fatal
//! failure produces a diagnostic root node.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod artifact;
pub mod builder;
pub mod diagnostics;

pub use artifact::BuildArtifact;
pub use builder::{BuildOptions, ComponentBuilder, Validation};
pub use diagnostics::{BuildError, BuildWarning};
