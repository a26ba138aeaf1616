//! Prelude module - commonly used types for convenient import.
//!
//! Use `use panelkit_blocks::prelude::*;` to import all essential types.

pub use crate::{
    BlockMetadata, Capability, CapabilityError, CapabilityRegistry, PortDef, RegistryError,
    RegistryResult, ResolvedBlock,
};
