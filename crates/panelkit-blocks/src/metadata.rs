//! Capability metadata.

use serde::{Deserialize, Serialize};

/// Version assumed when metadata does not declare one.
pub const DEFAULT_BLOCK_VERSION: &str = "1.0.0";

/// A named input or output port of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDef {
    /// Prop name.
    pub name: String,
    /// Free-form type label, e.g. `string` or `number`.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Whether the prop must be present for the capability to render.
    #[serde(default)]
    pub required: bool,
}

impl PortDef {
    /// An optional port.
    pub fn optional(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            required: false,
        }
    }

    /// A required port.
    pub fn required(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            required: true,
        }
    }
}

fn default_kind() -> String {
    "any".to_owned()
}

fn default_category() -> String {
    "general".to_owned()
}

fn default_version() -> String {
    DEFAULT_BLOCK_VERSION.to_owned()
}

/// Descriptive metadata for a registered capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    /// Unique capability id referenced from templates.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Catalog category.
    #[serde(default = "default_category")]
    pub category: String,
    /// Capability version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Props the capability reads.
    #[serde(default)]
    pub inputs: Vec<PortDef>,
    /// Values the capability produces.
    #[serde(default)]
    pub outputs: Vec<PortDef>,
    /// Other capability ids this one renders internally.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether the capability passed the host's compliance review.
    #[serde(default, alias = "complianceFlag")]
    pub compliance: bool,
    /// Hex blake3 digest of the remaining fields. Filled in by the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,
    /// Deprecation notice; templates using the capability get a warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
}

impl BlockMetadata {
    /// Minimal metadata for `id`, named after it.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category: default_category(),
            version: default_version(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
            compliance: false,
            integrity_hash: None,
            deprecated: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Add an input port.
    #[must_use]
    pub fn with_input(mut self, port: PortDef) -> Self {
        self.inputs.push(port);
        self
    }

    /// Mark the capability deprecated.
    #[must_use]
    pub fn with_deprecation(mut self, notice: impl Into<String>) -> Self {
        self.deprecated = Some(notice.into());
        self
    }

    /// Names of the inputs that must be present.
    pub fn required_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// Compute the integrity digest over every field except
    /// `integrity_hash` itself.
    #[must_use]
    pub fn compute_integrity(&self) -> String {
        let unhashed = Self {
            integrity_hash: None,
            ..self.clone()
        };
        // Serializing plain strings, bools and vectors cannot fail.
        let bytes = serde_json::to_vec(&unhashed).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_ignores_the_stored_hash() {
        let meta = BlockMetadata::new("text");
        let hash = meta.compute_integrity();
        let stamped = BlockMetadata {
            integrity_hash: Some(hash.clone()),
            ..meta
        };
        assert_eq!(stamped.compute_integrity(), hash);
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn integrity_tracks_content() {
        let a = BlockMetadata::new("text");
        let b = BlockMetadata::new("text").with_category("layout");
        assert_ne!(a.compute_integrity(), b.compute_integrity());
    }

    #[test]
    fn deserializes_with_defaults() {
        let meta: BlockMetadata = toml::from_str(
            r#"
            id = "button"
            complianceFlag = true
            inputs = [{ name = "label", required = true }]
            "#,
        )
        .unwrap();
        assert_eq!(meta.category, "general");
        assert_eq!(meta.version, DEFAULT_BLOCK_VERSION);
        assert!(meta.compliance);
        assert_eq!(meta.inputs[0].kind, "any");
        assert_eq!(meta.required_inputs().collect::<Vec<_>>(), ["label"]);
    }
}
