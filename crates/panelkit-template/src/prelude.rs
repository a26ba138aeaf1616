//! Prelude module - commonly used types for convenient import.
//!
//! Use `use panelkit_template::prelude::*;` to import all essential types.

// Parsing
pub use crate::{ParseOptions, ParseOutcome, Parser, SyntaxError, parse};

// AST
pub use crate::{ComponentNode, ComponentTree, NodeId, NodeKind, TemplateAst};

// Actions
pub use crate::{ActionNode, ActionRef, Branch};

// Analysis
pub use crate::{TemplateAnalysis, analyze};
