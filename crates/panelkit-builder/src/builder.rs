//! Component builder.
//!
//! Walks a [`TemplateAst`] depth-first, resolving each node's capability in
//! the injected [`CapabilityRegistry`] and invoking its factory with
//! interpolated props. Every failure is contained: a missing capability, a
//! factory error, or a factory panic becomes a [`BuildError`] plus a
//! diagnostic node at that position, and the siblings carry on.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use panelkit_blocks::{BlockMetadata, CapabilityRegistry, ResolvedBlock};
use panelkit_core::state::merge_values;
use panelkit_core::{Bridge, IconSpec, Props, RenderNode, Scope, evaluate_condition, interpolate};
use panelkit_template::{
    ActionRef, ComponentNode, ComponentTree, DEFAULT_MAX_DEPTH, NodeId, ParseOptions,
    ParseOutcome, Parser, TemplateAst,
};

use crate::artifact::BuildArtifact;
use crate::diagnostics::{BuildError, BuildWarning};

/// Builder tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Parser nesting limit used by the text entry points.
    pub max_depth: usize,
    /// Whether never-referenced actions produce a warning.
    pub warn_unused_actions: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            warn_unused_actions: true,
        }
    }
}

/// Outcome of [`ComponentBuilder::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validation {
    /// Whether the template built with no errors.
    pub valid: bool,
    /// Errors, syntax errors first.
    pub errors: Vec<BuildError>,
    /// Warnings.
    pub warnings: Vec<BuildWarning>,
}

/// Binds templates to capabilities.
#[derive(Clone)]
pub struct ComponentBuilder {
    registry: Arc<CapabilityRegistry>,
    bridge: Arc<dyn Bridge>,
    options: BuildOptions,
}

impl std::fmt::Debug for ComponentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBuilder")
            .field("registry", &self.registry)
            .field("panel", &self.bridge.panel().id)
            .field("options", &self.options)
            .finish()
    }
}

impl ComponentBuilder {
    /// Create a builder over a registry and the bridge handed to factories.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, bridge: Arc<dyn Bridge>) -> Self {
        Self {
            registry,
            bridge,
            options: BuildOptions::default(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// The registry builds resolve against.
    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// The bridge handed to factories.
    #[must_use]
    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    /// A parser configured with this builder's nesting limit.
    #[must_use]
    pub fn parser(&self) -> Parser {
        Parser::new(ParseOptions {
            max_depth: self.options.max_depth,
        })
    }

    /// Build an AST against a host state snapshot.
    ///
    /// The template's own `state` mapping supplies defaults; host values
    /// win.
    #[must_use]
    pub fn build(&self, ast: &TemplateAst, state: &Value) -> BuildArtifact {
        self.build_with(ast, state, Vec::new())
    }

    /// Build a parse outcome. Syntax errors lead the artifact's error list;
    /// an outcome with no AST yields a diagnostic root.
    #[must_use]
    pub fn build_outcome(&self, outcome: &ParseOutcome, state: &Value) -> BuildArtifact {
        let syntax: Vec<BuildError> = outcome
            .errors
            .iter()
            .cloned()
            .map(BuildError::Syntax)
            .collect();
        match &outcome.ast {
            Some(ast) => self.build_with(ast, state, syntax),
            None => BuildArtifact::failed(None, syntax, Vec::new()),
        }
    }

    /// Parse and build template text.
    #[must_use]
    pub fn build_text(&self, text: &str, state: &Value) -> BuildArtifact {
        self.build_outcome(&self.parser().parse(text), state)
    }

    /// Run the full pipeline against empty host state and report whether
    /// any error occurred.
    #[must_use]
    pub fn validate(&self, text: &str) -> Validation {
        let artifact = self.build_text(text, &Value::Object(Map::new()));
        Validation {
            valid: artifact.is_ok(),
            errors: artifact.errors,
            warnings: artifact.warnings,
        }
    }

    fn build_with(&self, ast: &TemplateAst, host: &Value, prior: Vec<BuildError>) -> BuildArtifact {
        let mut state = ast.state.clone();
        merge_values(&mut state, host);

        let mut pass = Pass {
            registry: &self.registry,
            bridge: self.bridge.as_ref(),
            tree: &ast.components,
            state: &state,
            errors: prior,
            warnings: Vec::new(),
            blocks_used: Vec::new(),
            seen_missing: HashSet::new(),
            seen_invalid: HashSet::new(),
            seen_deprecated: HashSet::new(),
        };
        pass.check_actions(ast, self.options.warn_unused_actions);

        let block = &ast.bootstrap.block;
        let Some(bootstrap) = self.registry.resolve(block) else {
            warn!(template = %ast.name, block = %block, "Bootstrap capability is not registered");
            pass.errors.push(BuildError::MissingCapability {
                block: block.clone(),
                path: "bootstrap".into(),
            });
            return BuildArtifact::failed(Some(block.clone()), pass.errors, pass.warnings);
        };

        pass.use_block(block, &bootstrap.metadata);
        let props = pass.interpolate_props(&ast.bootstrap.props, "bootstrap");
        let rendered = pass
            .check_required(block, "bootstrap", &bootstrap.metadata, &props)
            .and_then(|()| {
                let children = pass.children(ast.components.roots());
                pass.render(block, "bootstrap", &bootstrap, &props, children)
            });

        let artifact = match rendered {
            Ok(root) => BuildArtifact {
                root,
                blocks_used: pass.blocks_used,
                warnings: pass.warnings,
                errors: pass.errors,
            },
            Err(_) => BuildArtifact::failed(Some(block.clone()), pass.errors, pass.warnings),
        };

        debug!(
            template = %ast.name,
            blocks = artifact.blocks_used.len(),
            errors = artifact.errors.len(),
            warnings = artifact.warnings.len(),
            "Built template"
        );
        artifact
    }
}

/// Mutable state for a single build.
struct Pass<'a> {
    registry: &'a CapabilityRegistry,
    bridge: &'a dyn Bridge,
    tree: &'a ComponentTree,
    state: &'a Value,
    errors: Vec<BuildError>,
    warnings: Vec<BuildWarning>,
    blocks_used: Vec<String>,
    seen_missing: HashSet<String>,
    seen_invalid: HashSet<String>,
    seen_deprecated: HashSet<String>,
}

impl Pass<'_> {
    fn children(&mut self, ids: &[NodeId]) -> Vec<RenderNode> {
        ids.iter().filter_map(|&id| self.node(id)).collect()
    }

    /// Build one node. `None` means the node was pruned by its condition.
    fn node(&mut self, id: NodeId) -> Option<RenderNode> {
        let tree = self.tree;
        let node = tree.get(id)?;

        if let Some(condition) = node.kind.condition()
            && !self.condition_holds(condition, &node.path)
        {
            trace!(path = %node.path, condition, "Pruned conditional node");
            return None;
        }

        let mut rendered = match node.kind.block() {
            None => {
                let props = self.interpolate_props(&node.props, &node.path);
                let children = self.children(&node.children);
                RenderNode::group(props, children)
            },
            Some(block) => match self.block_node(block, node) {
                Ok(rendered) => rendered,
                Err(message) => {
                    return Some(RenderNode::diagnostic(
                        Some(block.to_owned()),
                        vec![message],
                    ));
                },
            },
        };

        for (event, action) in &node.on {
            rendered
                .bindings
                .entry(event.clone())
                .or_insert_with(|| action.clone());
        }
        let icons = self.icons(node);
        rendered.icons.extend(icons);
        Some(rendered)
    }

    fn block_node(&mut self, block: &str, node: &ComponentNode) -> Result<RenderNode, String> {
        let Some(resolved) = self.registry.resolve(block) else {
            return Err(self.fail(BuildError::MissingCapability {
                block: block.to_owned(),
                path: node.path.clone(),
            }));
        };
        self.use_block(block, &resolved.metadata);
        let props = self.interpolate_props(&node.props, &node.path);
        self.check_required(block, &node.path, &resolved.metadata, &props)?;
        let children = self.children(&node.children);
        self.render(block, &node.path, &resolved, &props, children)
    }

    /// Invoke a factory, containing errors and panics.
    fn render(
        &mut self,
        block: &str,
        path: &str,
        resolved: &ResolvedBlock,
        props: &Props,
        children: Vec<RenderNode>,
    ) -> Result<RenderNode, String> {
        let bridge = self.bridge;
        let capability = &resolved.capability;
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| capability.render(props, children, bridge)));

        let message = match outcome {
            Ok(Ok(mut node)) => {
                node.block.get_or_insert_with(|| block.to_owned());
                return Ok(node);
            },
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        warn!(block, path, error = %message, "Capability factory failed");
        Err(self.fail(BuildError::FactoryFault {
            block: block.to_owned(),
            path: path.to_owned(),
            message,
        }))
    }

    fn check_required(
        &mut self,
        block: &str,
        path: &str,
        metadata: &BlockMetadata,
        props: &Props,
    ) -> Result<(), String> {
        let missing = metadata
            .required_inputs()
            .find(|name| props.get(*name).is_none_or(Value::is_null));
        match missing {
            Some(prop) => Err(self.fail(BuildError::InvalidProp {
                block: block.to_owned(),
                path: path.to_owned(),
                prop: prop.to_owned(),
                message: "is required".into(),
            })),
            None => Ok(()),
        }
    }

    /// Record an error and return its message for the placeholder node.
    fn fail(&mut self, error: BuildError) -> String {
        let message = error.to_string();
        self.errors.push(error);
        message
    }

    fn use_block(&mut self, block: &str, metadata: &BlockMetadata) {
        if !self.blocks_used.iter().any(|b| b == block) {
            self.blocks_used.push(block.to_owned());
        }
        if let Some(notice) = &metadata.deprecated
            && self.seen_deprecated.insert(block.to_owned())
        {
            self.warnings.push(BuildWarning::DeprecatedCapability {
                block: block.to_owned(),
                notice: notice.clone(),
            });
        }
    }

    fn condition_holds(&mut self, condition: &str, path: &str) -> bool {
        match evaluate_condition(condition, &Scope::new(self.state)) {
            Ok(holds) => holds,
            Err(e) => {
                self.warnings.push(BuildWarning::InvalidExpression {
                    expression: condition.to_owned(),
                    path: path.to_owned(),
                    message: e.to_string(),
                });
                true
            },
        }
    }

    fn interpolate_props(&mut self, props: &Props, path: &str) -> Props {
        let result = interpolate(&Value::Object(props.clone()), &Scope::new(self.state));
        self.note_unresolved(&result.missing, &result.invalid, path);
        match result.value {
            Value::Object(map) => map,
            _ => Props::new(),
        }
    }

    fn note_unresolved(&mut self, missing: &[String], invalid: &[String], path: &str) {
        for expression in missing {
            if self.seen_missing.insert(expression.clone()) {
                self.warnings.push(BuildWarning::UnresolvedPath {
                    expression: expression.clone(),
                    path: path.to_owned(),
                });
            }
        }
        for expression in invalid {
            if self.seen_invalid.insert(expression.clone()) {
                self.warnings.push(BuildWarning::InvalidExpression {
                    expression: expression.clone(),
                    path: path.to_owned(),
                    message: "not a state path".into(),
                });
            }
        }
    }

    fn icons(&mut self, node: &ComponentNode) -> Vec<IconSpec> {
        let mut out = Vec::with_capacity(node.icons.len());
        for icon in &node.icons {
            let mut icon = icon.clone();
            match self.registry.resolve(&icon.block) {
                Some(resolved) => self.use_block(&icon.block, &resolved.metadata),
                None => self.warnings.push(BuildWarning::UnknownIcon {
                    block: icon.block.clone(),
                    path: node.path.clone(),
                }),
            }
            if let Some(color) = &icon.color {
                let result = interpolate(&Value::String(color.clone()), &Scope::new(self.state));
                self.note_unresolved(&result.missing, &result.invalid, &node.path);
                if let Value::String(color) = result.value {
                    icon.color = Some(color);
                }
            }
            out.push(icon);
        }
        out
    }

    /// Report dangling and unused action references.
    fn check_actions(&mut self, ast: &TemplateAst, warn_unused: bool) {
        let defined = &ast.actions;
        let mut dangling: Vec<(String, String)> = Vec::new();
        let mut check = |action: &str, path: String| {
            if !defined.contains_key(action) {
                dangling.push((action.to_owned(), path));
            }
        };

        ast.components.walk(&mut |_, node| {
            for (event, action) in &node.on {
                check(action, format!("{}.on.{event}", node.path));
            }
            for (i, icon) in node.icons.iter().enumerate() {
                if let Some(action) = &icon.action {
                    check(action, format!("{}.icons[{i}].action", node.path));
                }
            }
        });
        for (i, event) in ast.events.iter().enumerate() {
            check(&event.action, format!("events[{i}].action"));
        }
        for (name, action) in &ast.actions {
            action.visit_refs(&mut |r| {
                if let ActionRef::Named(target) = r {
                    check(target, format!("actions.{name}"));
                }
            });
        }

        self.errors.extend(
            dangling
                .into_iter()
                .map(|(action, path)| BuildError::UnknownAction { action, path }),
        );

        if warn_unused {
            let used = ast.referenced_actions();
            for name in ast.actions.keys() {
                if !used.contains(name.as_str()) {
                    self.warnings.push(BuildWarning::UnusedAction {
                        action: name.clone(),
                    });
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelkit_blocks::{BlockMetadata, PortDef};
    use panelkit_core::{NullBridge, RenderKind};
    use panelkit_test::capabilities::{failing, panicking, registry_with};
    use panelkit_test::fixtures;
    use serde_json::json;

    fn builder(ids: &[&str]) -> ComponentBuilder {
        ComponentBuilder::new(registry_with(ids), Arc::new(NullBridge::new("test")))
    }

    fn empty() -> Value {
        json!({})
    }

    #[test]
    fn minimal_template_builds_cleanly() {
        let artifact = builder(&["root"]).build_text(fixtures::MINIMAL, &empty());
        assert!(artifact.errors.is_empty(), "{:?}", artifact.errors);
        assert_eq!(artifact.blocks_used, ["root"]);
        assert!(!artifact.is_fatal());
    }

    #[test]
    fn unregistered_bootstrap_is_fatal() {
        let artifact = builder(&[]).build_text(fixtures::MINIMAL, &empty());
        assert_eq!(artifact.errors.len(), 1);
        assert!(matches!(
            &artifact.errors[0],
            BuildError::MissingCapability { block, path } if block == "root" && path == "bootstrap"
        ));
        assert!(artifact.is_fatal());
        assert_eq!(artifact.root.messages().len(), 1);
        assert!(artifact.blocks_used.is_empty());
    }

    #[test]
    fn one_missing_capability_among_siblings() {
        let text = r"
name: siblings
bootstrap: panel
components:
  - text
  - chart
  - text
  - button
";
        let artifact = builder(&["panel", "text", "button"]).build_text(text, &empty());
        assert_eq!(artifact.errors.len(), 1);
        let children = &artifact.root.children;
        assert_eq!(children.len(), 4);
        assert_eq!(children.iter().filter(|c| c.is_diagnostic()).count(), 1);
        assert!(children[1].is_diagnostic());
        assert_eq!(children[1].block.as_deref(), Some("chart"));
        assert_eq!(artifact.blocks_used, ["panel", "text", "button"]);
    }

    #[test]
    fn falsy_condition_prunes_the_subtree_silently() {
        let builder = builder(&["panel", "banner", "text"]);
        let hidden = builder.build_text(fixtures::CONDITIONAL, &json!({ "flag": false }));
        assert!(hidden.errors.is_empty());
        assert!(hidden.warnings.is_empty(), "{:?}", hidden.warnings);
        assert!(hidden.root.children.is_empty());
        assert_eq!(hidden.blocks_used, ["panel"]);

        let shown = builder.build_text(fixtures::CONDITIONAL, &json!({ "flag": true }));
        assert_eq!(shown.root.children.len(), 1);
        assert_eq!(shown.blocks_used, ["panel", "banner", "text"]);
    }

    #[test]
    fn missing_path_is_preserved_with_one_warning() {
        let text = r#"
name: missing
bootstrap: panel
components:
  - block: text
    props: { value: "Hello {{ state.missing }}" }
  - block: text
    props: { value: "{{ state.missing }}" }
"#;
        let artifact = builder(&["panel", "text"]).build_text(text, &empty());
        assert!(artifact.errors.is_empty());
        assert_eq!(artifact.warnings.len(), 1);
        assert!(matches!(
            &artifact.warnings[0],
            BuildWarning::UnresolvedPath { expression, .. } if expression == "state.missing"
        ));
        assert_eq!(
            artifact.root.children[0].props["value"],
            "Hello {{ state.missing }}"
        );
    }

    #[test]
    fn props_are_interpolated_and_host_state_wins() {
        let text = r#"
name: state
bootstrap: panel
state: { count: 1, label: Count }
components:
  - block: text
    props: { value: "{{ state.count }}", label: "{{ state.label }}: {{ state.count }}" }
"#;
        let artifact = builder(&["panel", "text"]).build_text(text, &json!({ "count": 5 }));
        let props = &artifact.root.children[0].props;
        assert_eq!(props["value"], 5);
        assert_eq!(props["label"], "Count: 5");
    }

    #[test]
    fn invalid_condition_warns_and_renders() {
        let text = r#"
name: bad
bootstrap: panel
components:
  - block: text
    condition: "state.a == 1"
"#;
        let artifact = builder(&["panel", "text"]).build_text(text, &empty());
        assert!(artifact.errors.is_empty());
        assert_eq!(artifact.root.children.len(), 1);
        assert!(matches!(
            artifact.warnings[0],
            BuildWarning::InvalidExpression { .. }
        ));
    }

    #[test]
    fn factory_errors_and_panics_are_contained() {
        let registry = registry_with(&["panel", "text"]);
        registry
            .register(BlockMetadata::new("broken"), failing("no data"))
            .unwrap();
        registry
            .register(BlockMetadata::new("explosive"), panicking("boom"))
            .unwrap();
        let builder = ComponentBuilder::new(registry, Arc::new(NullBridge::new("test")));

        let text = "name: f\nbootstrap: panel\ncomponents: [text, broken, explosive, text]\n";
        let artifact = builder.build_text(text, &empty());

        assert_eq!(artifact.errors.len(), 2);
        let messages: Vec<String> = artifact.errors.iter().map(ToString::to_string).collect();
        assert!(messages[0].contains("no data"));
        assert!(messages[1].contains("boom"));
        let kinds: Vec<bool> = artifact
            .root
            .children
            .iter()
            .map(RenderNode::is_diagnostic)
            .collect();
        assert_eq!(kinds, [false, true, true, false]);
    }

    #[test]
    fn required_input_missing_is_an_invalid_prop() {
        let registry = registry_with(&["panel"]);
        registry
            .register_element(
                BlockMetadata::new("button").with_input(PortDef::required("label", "string")),
            )
            .unwrap();
        let builder = ComponentBuilder::new(registry, Arc::new(NullBridge::new("test")));

        let text = r"
name: p
bootstrap: panel
components:
  - button
  - block: button
    props: { label: Go }
";
        let artifact = builder.build_text(text, &empty());
        assert_eq!(artifact.errors.len(), 1);
        assert!(matches!(
            &artifact.errors[0],
            BuildError::InvalidProp { prop, .. } if prop == "label"
        ));
        assert!(artifact.root.children[0].is_diagnostic());
        assert!(!artifact.root.children[1].is_diagnostic());
    }

    #[test]
    fn deprecated_capability_warns_once() {
        let registry = registry_with(&["panel"]);
        registry
            .register_element(BlockMetadata::new("old").with_deprecation("use `new`"))
            .unwrap();
        let builder = ComponentBuilder::new(registry, Arc::new(NullBridge::new("test")));

        let artifact =
            builder.build_text("name: d\nbootstrap: panel\ncomponents: [old, old]\n", &empty());
        assert!(artifact.is_ok());
        assert_eq!(artifact.warnings.len(), 1);
        assert!(matches!(
            artifact.warnings[0],
            BuildWarning::DeprecatedCapability { .. }
        ));
    }

    #[test]
    fn action_references_are_checked() {
        let text = r"
name: a
bootstrap: panel
components:
  - block: button
    on: { click: missing }
actions:
  orphan: { type: sendMessage, message: x }
";
        let artifact = builder(&["panel", "button"]).build_text(text, &empty());
        assert_eq!(
            artifact.errors,
            [BuildError::UnknownAction {
                action: "missing".into(),
                path: "components[0].on.click".into(),
            }]
        );
        assert_eq!(
            artifact.warnings,
            [BuildWarning::UnusedAction {
                action: "orphan".into()
            }]
        );
        assert_eq!(
            artifact.root.children[0].bindings.get("click").map(String::as_str),
            Some("missing")
        );

        let quiet = builder(&["panel", "button"]).with_options(BuildOptions {
            warn_unused_actions: false,
            ..BuildOptions::default()
        });
        assert!(quiet.build_text(text, &empty()).warnings.is_empty());
    }

    #[test]
    fn icons_resolve_against_the_registry() {
        let text = r#"
name: i
bootstrap: panel
state: { tone: red }
components:
  - block: row
    icons:
      - { block: star, color: "{{ state.tone }}" }
      - { block: ghost }
"#;
        let artifact = builder(&["panel", "row", "star"]).build_text(text, &empty());
        assert_eq!(artifact.blocks_used, ["panel", "row", "star"]);
        assert_eq!(
            artifact.warnings,
            [BuildWarning::UnknownIcon {
                block: "ghost".into(),
                path: "components[0]".into(),
            }]
        );
        assert_eq!(artifact.root.children[0].icons[0].color.as_deref(), Some("red"));
    }

    #[test]
    fn containers_render_as_groups() {
        let text = "name: g\nbootstrap: panel\ncomponents:\n  - children: [text, text]\n";
        let artifact = builder(&["panel", "text"]).build_text(text, &empty());
        let group = &artifact.root.children[0];
        assert_eq!(group.kind, RenderKind::Group);
        assert_eq!(group.children.len(), 2);
        assert_eq!(artifact.root.count(), 4);
    }

    #[test]
    fn unusable_document_yields_a_diagnostic_root() {
        let artifact = builder(&["panel"]).build_text("- not a template\n", &empty());
        assert!(artifact.is_fatal());
        assert!(matches!(artifact.errors[0], BuildError::Syntax(_)));
    }

    #[test]
    fn syntax_errors_lead_when_an_ast_survives() {
        let text = "name: s\nbootstrap: panel\ncomponents: [42, text]\n";
        let artifact = builder(&["panel", "text"]).build_text(text, &empty());
        assert_eq!(artifact.errors.len(), 1);
        assert!(matches!(artifact.errors[0], BuildError::Syntax(_)));
        assert!(!artifact.is_fatal());
        assert_eq!(artifact.root.children.len(), 1);
    }

    #[test]
    fn validate_reports_only_errors() {
        let builder = builder(&["root"]);
        assert!(builder.validate(fixtures::MINIMAL).valid);
        assert!(!builder.validate("name: x\nbootstrap: nope\n").valid);
    }
}
