//! Abstract syntax tree for a parsed template.
//!
//! Component nodes live in an arena ([`ComponentTree`]) and refer to their
//! children by [`NodeId`]. The parser only ever creates references from a
//! parent to nodes nested beneath it in the source text, so the tree has no
//! cycles by construction.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Index;

use serde::Serialize;
use serde_json::Value;

use panelkit_core::{IconSpec, Props};

use crate::action::{ActionNode, ActionRef};

/// Version assumed when a template does not declare one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// A parsed template document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateAst {
    /// Template name.
    pub name: String,
    /// Optional free-form description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template version (defaults to [`DEFAULT_VERSION`]).
    pub version: String,
    /// The root capability every other node is rendered into.
    pub bootstrap: Bootstrap,
    /// The component node arena.
    pub components: ComponentTree,
    /// Named actions.
    pub actions: BTreeMap<String, ActionNode>,
    /// Host events bound to actions.
    pub events: Vec<EventDescriptor>,
    /// Initial state declared by the template.
    pub state: Value,
}

impl TemplateAst {
    /// Every action name referenced from node bindings, icons, events, and
    /// other actions.
    #[must_use]
    pub fn referenced_actions(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for node in self.components.iter() {
            names.extend(node.on.values().map(String::as_str));
            names.extend(node.icons.iter().filter_map(|i| i.action.as_deref()));
        }
        names.extend(self.events.iter().map(|e| e.action.as_str()));
        for action in self.actions.values() {
            action.visit_refs(&mut |r| {
                if let ActionRef::Named(name) = r {
                    names.insert(name.as_str());
                }
            });
        }
        names
    }

    /// Every capability id mentioned anywhere in the document, bootstrap
    /// first, deduplicated in document order.
    #[must_use]
    pub fn referenced_blocks(&self) -> Vec<String> {
        let mut out = vec![self.bootstrap.block.clone()];
        self.components.walk(&mut |_, node| {
            let ids = node
                .kind
                .block()
                .into_iter()
                .chain(node.icons.iter().map(|i| i.block.as_str()));
            for id in ids {
                if !out.iter().any(|seen| seen == id) {
                    out.push(id.to_owned());
                }
            }
        });
        out
    }
}

/// The bootstrap entry naming the root capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bootstrap {
    /// Root capability id.
    pub block: String,
    /// Props for the root capability.
    pub props: Props,
}

/// A host event bound to an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventDescriptor {
    /// Host event name.
    pub event: String,
    /// Action to run when the event fires.
    pub action: String,
}

/// Index of a node in a [`ComponentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a component node is, independent of its props.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// A capability with no children.
    Leaf {
        /// Capability id.
        block: String,
    },
    /// A node with children, or a node with no capability at all.
    Container {
        /// Capability id, absent for pure containers.
        block: Option<String>,
    },
    /// A node rendered only when its condition is truthy.
    Conditional {
        /// Uninterpreted condition expression.
        condition: String,
        /// The node kind used when the condition holds.
        inner: Box<NodeKind>,
    },
}

impl NodeKind {
    /// Capability id, if the node has one.
    #[must_use]
    pub fn block(&self) -> Option<&str> {
        match self {
            Self::Leaf { block } => Some(block),
            Self::Container { block } => block.as_deref(),
            Self::Conditional { inner, .. } => inner.block(),
        }
    }

    /// Condition expression, if the node is conditional.
    #[must_use]
    pub fn condition(&self) -> Option<&str> {
        match self {
            Self::Conditional { condition, .. } => Some(condition),
            _ => None,
        }
    }
}

/// A component node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentNode {
    /// Node kind.
    pub kind: NodeKind,
    /// Raw (uninterpolated) props.
    pub props: Props,
    /// Event name to action name bindings.
    pub on: BTreeMap<String, String>,
    /// Icon descriptors.
    pub icons: Vec<IconSpec>,
    /// Children in document order.
    pub children: Vec<NodeId>,
    /// Location of the node in the document, e.g. `components[1].children[0]`.
    pub path: String,
}

/// Arena holding every component node of a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentTree {
    nodes: Vec<ComponentNode>,
    roots: Vec<NodeId>,
}

impl ComponentTree {
    /// Top-level nodes in document order.
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Look up a node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&ComponentNode> {
        self.nodes.get(id.0)
    }

    /// Total number of nodes, including nested children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate nodes in storage order (children before their parents).
    pub fn iter(&self) -> impl Iterator<Item = &ComponentNode> {
        self.nodes.iter()
    }

    /// Visit nodes depth-first in document order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(NodeId, &'a ComponentNode)) {
        for &root in &self.roots {
            self.walk_from(root, visit);
        }
    }

    fn walk_from<'a>(&'a self, id: NodeId, visit: &mut impl FnMut(NodeId, &'a ComponentNode)) {
        if let Some(node) = self.get(id) {
            visit(id, node);
            for &child in &node.children {
                self.walk_from(child, visit);
            }
        }
    }

    /// Append a node and return its id.
    pub(crate) fn push(&mut self, node: ComponentNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Record a top-level node.
    pub(crate) fn push_root(&mut self, id: NodeId) {
        self.roots.push(id);
    }
}

impl Index<NodeId> for ComponentTree {
    type Output = ComponentNode;

    fn index(&self, id: NodeId) -> &ComponentNode {
        &self.nodes[id.0]
    }
}
