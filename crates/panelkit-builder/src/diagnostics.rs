//! Build diagnostics.
//!
//! Errors and warnings are data carried by the artifact, never raised.
//! An error marks the template as broken and usually means part of the tree
//! was replaced by a diagnostic node. Warnings never change the tree.

use std::fmt;

use serde::Serialize;

use panelkit_template::SyntaxError;

/// A problem that replaced part of the built tree, or made the template
/// unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildError {
    /// A node names a capability that is not registered.
    MissingCapability {
        /// Capability id.
        block: String,
        /// Node location.
        path: String,
    },
    /// A capability factory returned an error or panicked.
    FactoryFault {
        /// Capability id.
        block: String,
        /// Node location.
        path: String,
        /// Error or panic message.
        message: String,
    },
    /// A required input of the capability is absent.
    InvalidProp {
        /// Capability id.
        block: String,
        /// Node location.
        path: String,
        /// Prop name.
        prop: String,
        /// What is wrong.
        message: String,
    },
    /// A binding names an action the template does not define.
    UnknownAction {
        /// Action name.
        action: String,
        /// Where the reference appears.
        path: String,
    },
    /// A parse error carried over into the build.
    Syntax(SyntaxError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCapability { block, path } => {
                write!(f, "{path}: capability '{block}' is not registered")
            },
            Self::FactoryFault {
                block,
                path,
                message,
            } => write!(f, "{path}: capability '{block}' failed: {message}"),
            Self::InvalidProp {
                block,
                path,
                prop,
                message,
            } => write!(f, "{path}: prop '{prop}' of '{block}' {message}"),
            Self::UnknownAction { action, path } => {
                write!(f, "{path}: action '{action}' is not defined")
            },
            Self::Syntax(e) => write!(f, "syntax: {e}"),
        }
    }
}

/// A problem worth reporting that does not change the built tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    /// A `{{ state.path }}` token did not resolve and was left verbatim.
    UnresolvedPath {
        /// The unresolved expression path.
        expression: String,
        /// First node where it was seen.
        path: String,
    },
    /// A condition or token is not a valid expression.
    InvalidExpression {
        /// The offending expression text.
        expression: String,
        /// Node location.
        path: String,
        /// Why it was rejected.
        message: String,
    },
    /// A capability in use is marked deprecated.
    DeprecatedCapability {
        /// Capability id.
        block: String,
        /// Deprecation notice.
        notice: String,
    },
    /// A named action is never referenced.
    UnusedAction {
        /// Action name.
        action: String,
    },
    /// An icon names a capability that is not registered.
    UnknownIcon {
        /// Icon capability id.
        block: String,
        /// Node location.
        path: String,
    },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedPath { expression, path } => {
                write!(f, "{path}: '{expression}' does not resolve")
            },
            Self::InvalidExpression {
                expression,
                path,
                message,
            } => write!(f, "{path}: invalid expression '{expression}': {message}"),
            Self::DeprecatedCapability { block, notice } => {
                write!(f, "capability '{block}' is deprecated: {notice}")
            },
            Self::UnusedAction { action } => write!(f, "action '{action}' is never used"),
            Self::UnknownIcon { block, path } => {
                write!(f, "{path}: icon '{block}' is not registered")
            },
        }
    }
}
