//! The bound node tree produced by a build.
//!
//! A [`RenderNode`] is what the rendering collaborator paints. The core never
//! interprets it beyond counting nodes and collecting diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property bag attached to template nodes and render nodes.
pub type Props = Map<String, Value>;

/// An icon decorating a component node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconSpec {
    /// Capability id that draws the icon.
    pub block: String,
    /// Icon color, possibly containing `{{ ... }}` tokens before a build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Action invoked when the icon is clicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Whether the icon follows the text color of its host node.
    #[serde(default)]
    pub match_color: bool,
    /// Placement hint (`"left"`, `"right"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

/// What kind of node the renderer is looking at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderKind {
    /// A node produced by a capability factory.
    Element,
    /// A pure container with no capability of its own.
    Group,
    /// A placeholder standing in for something that failed to build.
    Diagnostic {
        /// Human-readable descriptions of what went wrong.
        messages: Vec<String>,
    },
}

/// A node in a bound, renderable tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderNode {
    /// Node kind.
    #[serde(flatten)]
    pub kind: RenderKind,
    /// Capability id that produced the node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    /// Interpolated properties.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Props,
    /// Event name to action name bindings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, String>,
    /// Icons attached to the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<IconSpec>,
    /// Child nodes in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderNode>,
}

impl RenderNode {
    /// Create an element node for a capability.
    #[must_use]
    pub fn element(block: impl Into<String>, props: Props) -> Self {
        Self {
            kind: RenderKind::Element,
            block: Some(block.into()),
            props,
            bindings: BTreeMap::new(),
            icons: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create a container node with no capability.
    #[must_use]
    pub fn group(props: Props, children: Vec<RenderNode>) -> Self {
        Self {
            kind: RenderKind::Group,
            block: None,
            props,
            bindings: BTreeMap::new(),
            icons: Vec::new(),
            children,
        }
    }

    /// Create a diagnostic placeholder.
    #[must_use]
    pub fn diagnostic(block: Option<String>, messages: Vec<String>) -> Self {
        Self {
            kind: RenderKind::Diagnostic { messages },
            block,
            props: Map::new(),
            bindings: BTreeMap::new(),
            icons: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Replace the children of this node.
    #[must_use]
    pub fn with_children(mut self, children: Vec<RenderNode>) -> Self {
        self.children = children;
        self
    }

    /// Whether this node is a diagnostic placeholder.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self.kind, RenderKind::Diagnostic { .. })
    }

    /// Diagnostic messages carried by this node (empty for other kinds).
    #[must_use]
    pub fn messages(&self) -> &[String] {
        match &self.kind {
            RenderKind::Diagnostic { messages } => messages,
            _ => &[],
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn count(&self) -> usize {
        self.children
            .iter()
            .fold(1usize, |acc, child| acc.saturating_add(child.count()))
    }

    /// Visit every node of the subtree in depth-first pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a RenderNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Collect every diagnostic node in the subtree.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<&RenderNode> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if node.is_diagnostic() {
                found.push(node);
            }
        });
        found
    }
}
