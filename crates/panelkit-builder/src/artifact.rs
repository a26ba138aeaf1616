//! Build artifacts.

use serde::Serialize;

use panelkit_core::RenderNode;

use crate::diagnostics::{BuildError, BuildWarning};

/// The output of one build.
///
/// Always contains a renderable root, even when the build failed outright.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    /// Root of the bound tree.
    pub root: RenderNode,
    /// Capability ids actually rendered, in first-seen order.
    pub blocks_used: Vec<String>,
    /// Warnings in the order they were found.
    pub warnings: Vec<BuildWarning>,
    /// Errors in the order they were found.
    pub errors: Vec<BuildError>,
}

impl BuildArtifact {
    /// An artifact whose root is a diagnostic node listing `errors`.
    #[must_use]
    pub fn failed(
        block: Option<String>,
        errors: Vec<BuildError>,
        warnings: Vec<BuildWarning>,
    ) -> Self {
        let messages = errors.iter().map(ToString::to_string).collect();
        Self {
            root: RenderNode::diagnostic(block, messages),
            blocks_used: Vec::new(),
            warnings,
            errors,
        }
    }

    /// Whether the build recorded no errors.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether the root itself is a diagnostic node.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.root.is_diagnostic()
    }
}
