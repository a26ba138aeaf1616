//! The capability rendering contract.

use panelkit_core::{Bridge, Props, RenderNode};

use crate::error::CapabilityError;

/// A pluggable renderer for one capability id.
///
/// Implementations turn already-interpolated props and already-built
/// children into a [`RenderNode`]. The builder contains any error or panic
/// raised here, so implementations need not be defensive about it.
pub trait Capability: Send + Sync {
    /// Render a node.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when the props are unusable or rendering
    /// fails; the builder substitutes a diagnostic node.
    fn render(
        &self,
        props: &Props,
        children: Vec<RenderNode>,
        bridge: &dyn Bridge,
    ) -> Result<RenderNode, CapabilityError>;
}

impl<F> Capability for F
where
    F: Fn(&Props, Vec<RenderNode>, &dyn Bridge) -> Result<RenderNode, CapabilityError>
        + Send
        + Sync,
{
    fn render(
        &self,
        props: &Props,
        children: Vec<RenderNode>,
        bridge: &dyn Bridge,
    ) -> Result<RenderNode, CapabilityError> {
        self(props, children, bridge)
    }
}

/// A capability that renders a plain element carrying its id and props.
///
/// Used for catalogs declared as data, where the host paints the element
/// itself.
#[derive(Debug, Clone)]
pub struct ElementCapability {
    id: String,
}

impl ElementCapability {
    /// Element capability for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Capability for ElementCapability {
    fn render(
        &self,
        props: &Props,
        children: Vec<RenderNode>,
        _bridge: &dyn Bridge,
    ) -> Result<RenderNode, CapabilityError> {
        Ok(RenderNode::element(self.id.clone(), props.clone()).with_children(children))
    }
}
