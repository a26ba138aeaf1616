//! Error types shared across panelkit crates.

use thiserror::Error;

/// Errors raised by a [`Bridge`](crate::Bridge) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The bridge does not implement an optional operation.
    #[error("bridge operation not supported: {0}")]
    Unsupported(String),

    /// The host side of the bridge is gone.
    #[error("bridge disconnected")]
    Disconnected,

    /// The host reported a failure.
    #[error("bridge request failed: {0}")]
    Failed(String),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while mutating a [`StateStore`](crate::StateStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// The path was empty or contained an empty segment.
    #[error("invalid state path '{0}'")]
    InvalidPath(String),

    /// A segment of the path walks into a scalar value.
    #[error("state path '{path}' crosses a non-container value at '{segment}'")]
    NotAContainer {
        /// The full path being written.
        path: String,
        /// The segment that could not be traversed.
        segment: String,
    },

    /// An array index is past the end of the array (appending is allowed).
    #[error("index {index} out of bounds for state path '{path}'")]
    IndexOutOfBounds {
        /// The full path being written.
        path: String,
        /// The offending index.
        index: usize,
    },
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors produced when an expression cannot be understood at all.
///
/// A well-formed expression that references an absent path is not an error;
/// it simply resolves to nothing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    /// The expression is not a path, a negated path, or a boolean literal.
    #[error("invalid expression '{0}'")]
    Syntax(String),
}
