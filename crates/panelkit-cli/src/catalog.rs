//! Block catalogs.
//!
//! The CLI has no real capability implementations. A catalog lists block
//! metadata; each entry is registered as a generic element capability so
//! templates can be validated and built against it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use panelkit_blocks::{BlockMetadata, CapabilityRegistry};

/// Catalog used when no `--blocks` file is given.
const BUILTIN_CATALOG: &str = include_str!("../blocks.toml");

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default, rename = "block")]
    blocks: Vec<BlockMetadata>,
}

/// Parse catalog text.
fn parse(text: &str) -> Result<Vec<BlockMetadata>> {
    let catalog: Catalog = toml::from_str(text).context("invalid block catalog")?;
    Ok(catalog.blocks)
}

/// Build a registry from the catalog at `path`, or the built-in one.
pub(crate) fn load(path: Option<&Path>) -> Result<Arc<CapabilityRegistry>> {
    let blocks = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read block catalog {}", path.display()))?;
            parse(&text).with_context(|| format!("in {}", path.display()))?
        },
        None => parse(BUILTIN_CATALOG)?,
    };

    let registry = CapabilityRegistry::new();
    for metadata in blocks {
        let id = metadata.id.clone();
        registry
            .register_element(metadata)
            .with_context(|| format!("cannot register block '{id}'"))?;
    }
    debug!(blocks = registry.len(), "Block catalog registered");
    Ok(Arc::new(registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_parses() {
        let registry = load(None).unwrap();
        for id in ["root", "panel", "text", "button"] {
            assert!(registry.contains(id), "missing {id}");
        }
    }

    #[test]
    fn test_custom_catalog_fields() {
        let blocks = parse(
            r#"
[[block]]
id = "legacy-card"
category = "layout"
deprecated = "use panel"
inputs = [{ name = "title", required = true }]
"#,
        )
        .unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].deprecated.as_deref(), Some("use panel"));
        assert_eq!(blocks[0].required_inputs().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn test_catalog_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.toml");
        std::fs::write(&path, "[[block]]\nid = \"only\"\n").unwrap();

        let registry = load(Some(&path)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("only"));
    }

    #[test]
    fn test_bad_catalog_is_an_error() {
        assert!(parse("[[block]]\nname = \"no id\"\n").is_err());
    }
}
