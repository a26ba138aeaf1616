//! panelkit Blocks - Capability metadata and registry.
//!
//! A capability (also called a block) is a pluggable renderer referenced by
//! id from templates. This crate provides:
//! - [`BlockMetadata`] describing a capability's ports, category, and status
//! - The single-method [`Capability`] rendering contract
//! - [`CapabilityRegistry`], the mutable id-to-capability table injected
//!   into every build

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod capability;
pub mod error;
pub mod metadata;
pub mod registry;

pub use capability::{Capability, ElementCapability};
pub use error::{CapabilityError, RegistryError, RegistryResult};
pub use metadata::{BlockMetadata, DEFAULT_BLOCK_VERSION, PortDef};
pub use registry::{CapabilityRegistry, ResolvedBlock};
