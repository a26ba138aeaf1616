//! Syntax diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A problem found while parsing a template.
///
/// Syntax errors are collected, never raised: the parser keeps going after
/// each one so a single pass reports as much as possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    /// What is wrong.
    pub message: String,
    /// Dotted location inside the document (`components[2].props`), empty
    /// for document-level problems.
    pub path: String,
    /// 1-based line, when the notation reader reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// 1-based column, when the notation reader reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl SyntaxError {
    /// Create an error at a document path.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
            line: None,
            column: None,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{line}:{column}: ")?,
            (Some(line), None) => write!(f, "{line}: ")?,
            _ => {},
        }
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}
