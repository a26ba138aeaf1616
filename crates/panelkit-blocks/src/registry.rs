//! Capability registry.
//!
//! An open table from capability id to metadata and a rendering factory.
//! The registry is an ordinary value injected into every build; it is
//! shared behind an `Arc` and mutated through `&self`, so registrations
//! made while the host is running are seen by the next build.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::capability::{Capability, ElementCapability};
use crate::error::{RegistryError, RegistryResult};
use crate::metadata::BlockMetadata;

/// A registry entry handed to the builder.
#[derive(Clone)]
pub struct ResolvedBlock {
    /// Metadata as stored at registration, integrity hash filled in.
    pub metadata: Arc<BlockMetadata>,
    /// The rendering factory.
    pub capability: Arc<dyn Capability>,
}

impl fmt::Debug for ResolvedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBlock")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Registry of capabilities keyed by id.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, ResolvedBlock>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any earlier entry with the same id.
    ///
    /// The metadata's integrity hash is recomputed. A declared hash that does
    /// not match the content is logged and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidMetadata`] if the id is empty or
    /// contains whitespace.
    pub fn register<C>(&self, metadata: BlockMetadata, capability: C) -> RegistryResult<()>
    where
        C: Capability + 'static,
    {
        self.register_arc(metadata, Arc::new(capability))
    }

    /// Register an already shared capability.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn register_arc(
        &self,
        mut metadata: BlockMetadata,
        capability: Arc<dyn Capability>,
    ) -> RegistryResult<()> {
        let id = metadata.id.clone();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidMetadata {
                id,
                message: "id must be non-empty and contain no whitespace".into(),
            });
        }

        let computed = metadata.compute_integrity();
        if let Some(declared) = &metadata.integrity_hash
            && *declared != computed
        {
            warn!(
                block_id = %id,
                declared = %declared,
                computed = %computed,
                "Integrity hash mismatch, using computed hash"
            );
        }
        metadata.integrity_hash = Some(computed.clone());

        let entry = ResolvedBlock {
            metadata: Arc::new(metadata),
            capability,
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.insert(id.clone(), entry) {
            Some(previous) => {
                let changed = previous.metadata.integrity_hash.as_deref() != Some(&*computed);
                info!(block_id = %id, metadata_changed = changed, "Replaced registered capability");
            },
            None => debug!(block_id = %id, "Registered capability"),
        }
        Ok(())
    }

    /// Register a generic [`ElementCapability`] for the metadata's id.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn register_element(&self, metadata: BlockMetadata) -> RegistryResult<()> {
        let capability = ElementCapability::new(metadata.id.clone());
        self.register(metadata, capability)
    }

    /// Look up a capability.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<ResolvedBlock> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Remove a capability, returning its entry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not registered.
    pub fn unregister(&self, id: &str) -> RegistryResult<ResolvedBlock> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;
        info!(block_id = %id, "Unregistered capability");
        Ok(removed)
    }

    /// Metadata of every registered capability, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<BlockMetadata>> {
        let mut out: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| Arc::clone(&e.metadata))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Metadata of the capabilities in `category`, sorted by id.
    #[must_use]
    pub fn by_category(&self, category: &str) -> Vec<Arc<BlockMetadata>> {
        self.list()
            .into_iter()
            .filter(|m| m.category == category)
            .collect()
    }

    /// Number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&String> = entries.keys().collect();
        ids.sort();
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use panelkit_core::{Bridge, NullBridge, Props, RenderNode};

    fn labelled(label: &'static str) -> impl Capability {
        move |_: &Props, _: Vec<RenderNode>, _: &dyn Bridge| {
            let mut props = Props::new();
            props.insert("label".into(), label.into());
            Ok::<_, CapabilityError>(RenderNode::element("x", props))
        }
    }

    fn render_label(registry: &CapabilityRegistry, id: &str) -> String {
        let block = registry.resolve(id).unwrap();
        let node = block
            .capability
            .render(&Props::new(), Vec::new(), &NullBridge::new("test"))
            .unwrap();
        node.props["label"].as_str().unwrap().to_owned()
    }

    #[test]
    fn register_and_resolve() {
        let registry = CapabilityRegistry::new();
        registry
            .register(BlockMetadata::new("text"), labelled("v1"))
            .unwrap();

        assert!(registry.contains("text"));
        assert!(registry.resolve("missing").is_none());
        assert_eq!(render_label(&registry, "text"), "v1");

        let stored = registry.resolve("text").unwrap().metadata;
        assert_eq!(
            stored.integrity_hash.as_deref(),
            Some(stored.compute_integrity().as_str())
        );
    }

    #[test]
    fn last_registration_wins() {
        let registry = CapabilityRegistry::new();
        registry
            .register(BlockMetadata::new("text"), labelled("v1"))
            .unwrap();
        registry
            .register(
                BlockMetadata::new("text").with_category("typography"),
                labelled("v2"),
            )
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(render_label(&registry, "text"), "v2");
        assert_eq!(registry.resolve("text").unwrap().metadata.category, "typography");
    }

    #[test]
    fn declared_hash_is_replaced() {
        let registry = CapabilityRegistry::new();
        let mut meta = BlockMetadata::new("text");
        meta.integrity_hash = Some("bogus".into());
        registry.register_element(meta).unwrap();

        let stored = registry.resolve("text").unwrap().metadata;
        assert_ne!(stored.integrity_hash.as_deref(), Some("bogus"));
    }

    #[test]
    fn rejects_bad_ids() {
        let registry = CapabilityRegistry::new();
        let err = registry
            .register_element(BlockMetadata::new("two words"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidMetadata { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_and_list() {
        let registry = CapabilityRegistry::new();
        registry
            .register_element(BlockMetadata::new("b").with_category("layout"))
            .unwrap();
        registry.register_element(BlockMetadata::new("a")).unwrap();

        let ids: Vec<_> = registry.list().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(registry.by_category("layout").len(), 1);

        registry.unregister("b").unwrap();
        assert!(matches!(
            registry.unregister("b"),
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn element_capability_keeps_props_and_children() {
        let registry = CapabilityRegistry::new();
        registry.register_element(BlockMetadata::new("card")).unwrap();

        let mut props = Props::new();
        props.insert("title".into(), "Hi".into());
        let child = RenderNode::element("text", Props::new());
        let node = registry
            .resolve("card")
            .unwrap()
            .capability
            .render(&props, vec![child], &NullBridge::new("test"))
            .unwrap();

        assert_eq!(node.block.as_deref(), Some("card"));
        assert_eq!(node.props["title"], "Hi");
        assert_eq!(node.children.len(), 1);
    }
}
