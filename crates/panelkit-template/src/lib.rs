//! panelkit Template - Notation parser and abstract syntax tree.
//!
//! Templates are YAML documents describing a bootstrap capability, a tree of
//! component nodes, named actions, and optional event bindings:
//!
//! ```yaml
//! name: counter
//! bootstrap: { block: panel, props: { title: Counter } }
//! components:
//!   - block: text
//!     props: { value: "{{ state.count }}" }
//!   - block: button
//!     props: { label: "+1" }
//!     on: { click: increment }
//! actions:
//!   increment: { type: setState, path: count, value: 1 }
//! ```
//!
//! [`parse`] never fails: it returns an optional [`TemplateAst`] together
//! with every [`SyntaxError`] found.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod action;
pub mod analyze;
pub mod ast;
pub mod error;
pub mod parser;

pub use action::{ActionNode, ActionRef, Branch};
pub use analyze::{TemplateAnalysis, analyze};
pub use ast::{
    Bootstrap, ComponentNode, ComponentTree, DEFAULT_VERSION, EventDescriptor, NodeId, NodeKind,
    TemplateAst,
};
pub use error::SyntaxError;
pub use parser::{DEFAULT_MAX_DEPTH, ParseOptions, ParseOutcome, Parser, parse};
