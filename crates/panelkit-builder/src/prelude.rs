//! Prelude module - commonly used types for convenient import.
//!
//! Use `use panelkit_builder::prelude::*;` to import all essential types.

pub use crate::{
    BuildArtifact, BuildError, BuildOptions, BuildWarning, ComponentBuilder, Validation,
};
