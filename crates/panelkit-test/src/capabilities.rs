//! Canned capabilities.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use panelkit_blocks::{BlockMetadata, Capability, CapabilityError, CapabilityRegistry};
use panelkit_core::{Bridge, Props, RenderNode};

/// A capability rendering a plain element for `id`.
pub fn element(id: &str) -> impl Capability + use<> {
    let id = id.to_string();
    move |props: &Props, children: Vec<RenderNode>, _: &dyn Bridge| {
        Ok::<_, CapabilityError>(
            RenderNode::element(id.clone(), props.clone()).with_children(children),
        )
    }
}

/// A capability that always returns an error.
pub fn failing(message: &'static str) -> impl Capability {
    move |_: &Props, _: Vec<RenderNode>, _: &dyn Bridge| {
        Err::<RenderNode, _>(CapabilityError::Failed(message.to_string()))
    }
}

/// A capability that always panics.
pub fn panicking(message: &'static str) -> impl Capability {
    move |_: &Props, _: Vec<RenderNode>, _: &dyn Bridge| -> Result<RenderNode, CapabilityError> {
        panic!("{message}")
    }
}

/// An element capability that counts its invocations.
pub fn counting(id: &str, calls: Arc<AtomicUsize>) -> impl Capability + use<> {
    let id = id.to_string();
    move |props: &Props, children: Vec<RenderNode>, _: &dyn Bridge| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, CapabilityError>(
            RenderNode::element(id.clone(), props.clone()).with_children(children),
        )
    }
}

/// A registry with an element capability for each id.
///
/// # Panics
///
/// Panics if an id is not a valid capability id.
#[must_use]
pub fn registry_with(ids: &[&str]) -> Arc<CapabilityRegistry> {
    let registry = CapabilityRegistry::new();
    for id in ids {
        registry
            .register(BlockMetadata::new(*id), element(id))
            .expect("valid capability id");
    }
    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelkit_core::NullBridge;

    #[test]
    fn test_counting_counts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cap = counting("x", Arc::clone(&calls));
        let bridge = NullBridge::new("t");
        cap.render(&Props::new(), Vec::new(), &bridge).ok();
        cap.render(&Props::new(), Vec::new(), &bridge).ok();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registry_with() {
        let registry = registry_with(&["a", "b"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("a").is_some());
    }
}
