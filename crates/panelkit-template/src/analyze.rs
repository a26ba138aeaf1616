//! Parser-only template summary.

use serde::Serialize;

use crate::error::SyntaxError;
use crate::parser::{ParseOutcome, Parser};

/// What a template declares, computed without resolving any capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAnalysis {
    /// Template name, absent when the document is unusable.
    pub name: Option<String>,
    /// Template version.
    pub version: Option<String>,
    /// Total component nodes, nested children included.
    pub component_count: usize,
    /// Named actions.
    pub action_count: usize,
    /// Event descriptors.
    pub event_count: usize,
    /// Capability ids referenced anywhere, bootstrap first.
    pub blocks: Vec<String>,
    /// Syntax errors.
    pub errors: Vec<SyntaxError>,
    /// Whether the document parsed cleanly.
    pub valid: bool,
}

impl From<&ParseOutcome> for TemplateAnalysis {
    fn from(outcome: &ParseOutcome) -> Self {
        let valid = outcome.is_clean();
        match &outcome.ast {
            Some(ast) => Self {
                name: Some(ast.name.clone()),
                version: Some(ast.version.clone()),
                component_count: ast.components.len(),
                action_count: ast.actions.len(),
                event_count: ast.events.len(),
                blocks: ast.referenced_blocks(),
                errors: outcome.errors.clone(),
                valid,
            },
            None => Self {
                name: None,
                version: None,
                component_count: 0,
                action_count: 0,
                event_count: 0,
                blocks: Vec::new(),
                errors: outcome.errors.clone(),
                valid,
            },
        }
    }
}

/// Parse `text` and summarise it. No capability factory is invoked.
#[must_use]
pub fn analyze(text: &str) -> TemplateAnalysis {
    TemplateAnalysis::from(&Parser::default().parse(text))
}
