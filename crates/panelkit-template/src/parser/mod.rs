//! Template notation parser.
//!
//! Templates are YAML documents. The parser reads the document into a
//! generic value tree, then walks it by hand so that every structural
//! problem becomes a [`SyntaxError`] with a document path instead of
//! aborting the whole parse. Parsing is deterministic: the same text always
//! yields the same AST and the same error list.

mod actions;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use serde_yaml::{Mapping, Value as Yaml};
use tracing::{debug, trace};

use panelkit_core::{IconSpec, Props};

use crate::ast::{
    Bootstrap, ComponentNode, ComponentTree, DEFAULT_VERSION, EventDescriptor, NodeId, NodeKind,
    TemplateAst,
};
use crate::error::SyntaxError;

/// Default maximum nesting depth for component nodes.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Parser tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Component nodes nested deeper than this are rejected.
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Result of a parse: an AST (absent when the root structure is unusable)
/// and every syntax error found.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    /// The AST, if the document declared a usable name and bootstrap.
    pub ast: Option<TemplateAst>,
    /// Syntax errors in document order.
    pub errors: Vec<SyntaxError>,
}

impl ParseOutcome {
    /// Whether the parse produced an AST with no errors.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.ast.is_some() && self.errors.is_empty()
    }
}

/// Parse template text with default options.
#[must_use]
pub fn parse(text: &str) -> ParseOutcome {
    Parser::new(ParseOptions::default()).parse(text)
}

/// A reusable, stateless parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parser {
    options: ParseOptions,
}

impl Parser {
    /// Create a parser.
    #[must_use]
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    /// Parse template text.
    #[must_use]
    pub fn parse(&self, text: &str) -> ParseOutcome {
        let mut ctx = Context::new(self.options);

        let root: Yaml = match serde_yaml::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                let mut err = SyntaxError::new("", format!("unreadable document: {e}"));
                if let Some(loc) = e.location() {
                    err.line = Some(loc.line());
                    err.column = Some(loc.column());
                }
                return ParseOutcome {
                    ast: None,
                    errors: vec![err],
                };
            },
        };

        let Yaml::Mapping(doc) = root else {
            let message = if root.is_null() {
                "document is empty"
            } else {
                "document root must be a mapping"
            };
            return ParseOutcome {
                ast: None,
                errors: vec![SyntaxError::new("", message)],
            };
        };

        let ast = ctx.document(&doc);
        debug!(
            ok = ast.is_some(),
            errors = ctx.errors.len(),
            "Parsed template"
        );
        ParseOutcome {
            ast,
            errors: ctx.errors,
        }
    }
}

/// Mutable state for a single parse.
struct Context {
    options: ParseOptions,
    errors: Vec<SyntaxError>,
    tree: ComponentTree,
}

impl Context {
    fn new(options: ParseOptions) -> Self {
        Self {
            options,
            errors: Vec::new(),
            tree: ComponentTree::default(),
        }
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(SyntaxError::new(path, message));
    }

    fn document(&mut self, doc: &Mapping) -> Option<TemplateAst> {
        let name = self.required_string(doc, "name", "");
        let bootstrap = self.bootstrap(doc);

        let description = match doc.get("description") {
            None | Some(Yaml::Null) => None,
            Some(Yaml::String(s)) => Some(s.clone()),
            Some(_) => {
                self.error("description", "must be a string");
                None
            },
        };

        let version = match doc.get("version") {
            None | Some(Yaml::Null) => DEFAULT_VERSION.to_owned(),
            Some(Yaml::String(s)) => s.clone(),
            Some(Yaml::Number(n)) => n.to_string(),
            Some(_) => {
                self.error("version", "must be a string");
                DEFAULT_VERSION.to_owned()
            },
        };

        match doc.get("components") {
            None | Some(Yaml::Null) => {},
            Some(Yaml::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let path = format!("components[{i}]");
                    if let Some(id) = self.component(item, &path, 1) {
                        self.tree.push_root(id);
                    }
                }
            },
            Some(_) => self.error("components", "must be a sequence of nodes"),
        }

        let actions = match doc.get("actions") {
            None | Some(Yaml::Null) => BTreeMap::new(),
            Some(Yaml::Mapping(map)) => actions::parse_actions(self, map),
            Some(_) => {
                self.error("actions", "must be a mapping of action names");
                BTreeMap::new()
            },
        };

        let events = self.events(doc);

        let state = match doc.get("state") {
            None | Some(Yaml::Null) => Value::Object(Map::new()),
            Some(value @ Yaml::Mapping(_)) => self
                .to_json(value, "state")
                .unwrap_or_else(|| Value::Object(Map::new())),
            Some(_) => {
                self.error("state", "must be a mapping");
                Value::Object(Map::new())
            },
        };

        for key in doc.keys() {
            if let Some(key) = key.as_str()
                && !KNOWN_ROOT_KEYS.contains(&key)
            {
                trace!(key, "Ignoring unknown top-level key");
            }
        }

        Some(TemplateAst {
            name: name?,
            description,
            version,
            bootstrap: bootstrap?,
            components: std::mem::take(&mut self.tree),
            actions,
            events,
            state,
        })
    }

    fn bootstrap(&mut self, doc: &Mapping) -> Option<Bootstrap> {
        match doc.get("bootstrap") {
            None | Some(Yaml::Null) => {
                self.error("bootstrap", "missing bootstrap entry");
                None
            },
            Some(Yaml::String(id)) if !id.trim().is_empty() => Some(Bootstrap {
                block: id.trim().to_owned(),
                props: Props::new(),
            }),
            Some(Yaml::Mapping(map)) => {
                let block = self.block_id(map, "bootstrap");
                let props = self.props(map, "bootstrap");
                match block {
                    Some(block) => Some(Bootstrap { block, props }),
                    None => {
                        self.error("bootstrap", "bootstrap must name a capability id");
                        None
                    },
                }
            },
            Some(_) => {
                self.error("bootstrap", "must be a capability id or a mapping");
                None
            },
        }
    }

    /// Parse one component node and its subtree, returning its arena id.
    fn component(&mut self, value: &Yaml, path: &str, depth: usize) -> Option<NodeId> {
        if depth > self.options.max_depth {
            self.error(
                path,
                format!("nesting exceeds the maximum depth of {}", self.options.max_depth),
            );
            return None;
        }

        let map = match value {
            Yaml::Mapping(map) => map,
            // `- divider` is shorthand for `- block: divider`.
            Yaml::String(id) if !id.trim().is_empty() => {
                let node = ComponentNode {
                    kind: NodeKind::Leaf {
                        block: id.trim().to_owned(),
                    },
                    props: Props::new(),
                    on: BTreeMap::new(),
                    icons: Vec::new(),
                    children: Vec::new(),
                    path: path.to_owned(),
                };
                return Some(self.tree.push(node));
            },
            _ => {
                self.error(path, "component must be a mapping");
                return None;
            },
        };

        let block = self.block_id(map, path);
        let props = self.props(map, path);
        let on = self.bindings(map, path);
        let icons = self.icons(map, path);

        let condition = match map.get("condition").or_else(|| map.get("if")) {
            None | Some(Yaml::Null) => None,
            Some(Yaml::String(s)) => Some(s.clone()),
            Some(Yaml::Bool(b)) => Some(b.to_string()),
            Some(_) => {
                self.error(format!("{path}.condition"), "must be a string expression");
                None
            },
        };

        let mut children = Vec::new();
        let has_children_key = match map.get("children") {
            None | Some(Yaml::Null) => false,
            Some(Yaml::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let child_path = format!("{path}.children[{i}]");
                    let next = depth.saturating_add(1);
                    if let Some(id) = self.component(item, &child_path, next) {
                        children.push(id);
                    }
                }
                true
            },
            Some(_) => {
                self.error(format!("{path}.children"), "must be a sequence of nodes");
                false
            },
        };

        let base = match block {
            Some(block) if !has_children_key => NodeKind::Leaf { block },
            block => NodeKind::Container { block },
        };
        let kind = match condition {
            Some(condition) => NodeKind::Conditional {
                condition,
                inner: Box::new(base),
            },
            None => base,
        };

        Some(self.tree.push(ComponentNode {
            kind,
            props,
            on,
            icons,
            children,
            path: path.to_owned(),
        }))
    }

    /// Read `block`, accepting `capabilityId` as an alias.
    fn block_id(&mut self, map: &Mapping, path: &str) -> Option<String> {
        let (key, value) = match (map.get("block"), map.get("capabilityId")) {
            (Some(v), _) => ("block", v),
            (None, Some(v)) => ("capabilityId", v),
            (None, None) => return None,
        };
        match value {
            Yaml::String(id) if !id.trim().is_empty() => Some(id.trim().to_owned()),
            Yaml::Null => None,
            _ => {
                self.error(format!("{path}.{key}"), "must be a non-empty string");
                None
            },
        }
    }

    fn props(&mut self, map: &Mapping, path: &str) -> Props {
        match map.get("props") {
            None | Some(Yaml::Null) => Props::new(),
            Some(value @ Yaml::Mapping(_)) => {
                match self.to_json(value, &format!("{path}.props")) {
                    Some(Value::Object(props)) => props,
                    _ => Props::new(),
                }
            },
            Some(_) => {
                self.error(format!("{path}.props"), "must be a mapping");
                Props::new()
            },
        }
    }

    fn bindings(&mut self, map: &Mapping, path: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        match map.get("on") {
            None | Some(Yaml::Null) => {},
            Some(Yaml::Mapping(entries)) => {
                for (event, action) in entries {
                    match (event.as_str(), action.as_str()) {
                        (Some(event), Some(action)) if !action.is_empty() => {
                            out.insert(event.to_owned(), action.to_owned());
                        },
                        _ => self.error(
                            format!("{path}.on"),
                            "bindings must map event names to action names",
                        ),
                    }
                }
            },
            Some(_) => self.error(format!("{path}.on"), "must be a mapping"),
        }
        out
    }

    fn icons(&mut self, map: &Mapping, path: &str) -> Vec<IconSpec> {
        let mut out = Vec::new();
        match map.get("icons") {
            None | Some(Yaml::Null) => {},
            Some(Yaml::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    match serde_yaml::from_value::<IconSpec>(item.clone()) {
                        Ok(icon) if !icon.block.trim().is_empty() => out.push(icon),
                        Ok(_) => self.error(format!("{path}.icons[{i}]"), "icon block is empty"),
                        Err(e) => self.error(format!("{path}.icons[{i}]"), e.to_string()),
                    }
                }
            },
            Some(_) => self.error(format!("{path}.icons"), "must be a sequence"),
        }
        out
    }

    fn events(&mut self, doc: &Mapping) -> Vec<EventDescriptor> {
        let mut out = Vec::new();
        match doc.get("events") {
            None | Some(Yaml::Null) => {},
            Some(Yaml::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let path = format!("events[{i}]");
                    let event = item.get("event").or_else(|| item.get("on"));
                    let action = item.get("action").and_then(Yaml::as_str);
                    match (event.and_then(Yaml::as_str), action) {
                        (Some(event), Some(action)) => out.push(EventDescriptor {
                            event: event.to_owned(),
                            action: action.to_owned(),
                        }),
                        _ => self.error(path, "event entries need string `event` and `action`"),
                    }
                }
            },
            Some(_) => self.error("events", "must be a sequence"),
        }
        out
    }

    fn required_string(&mut self, doc: &Mapping, key: &str, prefix: &str) -> Option<String> {
        let path = if prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{prefix}.{key}")
        };
        match doc.get(key) {
            Some(Yaml::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            None | Some(Yaml::Null) => {
                self.error(path, format!("missing required `{key}`"));
                None
            },
            Some(_) => {
                self.error(path, "must be a non-empty string");
                None
            },
        }
    }

    /// Convert a YAML subtree to JSON, reporting keys JSON cannot represent.
    fn to_json(&mut self, value: &Yaml, path: &str) -> Option<Value> {
        match serde_json::to_value(value) {
            Ok(json) => Some(json),
            Err(e) => {
                self.error(path, format!("unsupported value: {e}"));
                None
            },
        }
    }
}

const KNOWN_ROOT_KEYS: &[&str] = &[
    "name",
    "description",
    "version",
    "bootstrap",
    "components",
    "actions",
    "events",
    "state",
];
