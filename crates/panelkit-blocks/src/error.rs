use thiserror::Error;

/// Errors raised by the capability registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No capability is registered under the id.
    #[error("Capability not found: {0}")]
    NotFound(String),
    /// The metadata offered at registration is unusable.
    #[error("Invalid metadata for '{id}': {message}")]
    InvalidMetadata {
        /// Offending capability id.
        id: String,
        /// What is wrong.
        message: String,
    },
}

/// A specialized Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors a capability factory may return from [`render`](crate::Capability::render).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The props handed to the factory are unusable.
    #[error("Invalid props: {0}")]
    InvalidProps(String),
    /// The factory failed for any other reason.
    #[error("Render failed: {0}")]
    Failed(String),
}
