//! `PANELKIT_*` environment overrides.
//!
//! Environment variables are the highest-precedence layer: a set variable
//! replaces whatever the embedded defaults and config files chose.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: FieldKind,
}

#[derive(Clone, Copy)]
enum FieldKind {
    String,
    Bool,
    Integer,
}

/// All supported `PANELKIT_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "PANELKIT_LOG_LEVEL",
        field_path: "logging.level",
        kind: FieldKind::String,
    },
    EnvMapping {
        var_name: "PANELKIT_LOG_FORMAT",
        field_path: "logging.format",
        kind: FieldKind::String,
    },
    EnvMapping {
        var_name: "PANELKIT_TEMPLATE_DIR",
        field_path: "templates.directory",
        kind: FieldKind::String,
    },
    EnvMapping {
        var_name: "PANELKIT_HOT_RELOAD",
        field_path: "templates.hot_reload",
        kind: FieldKind::Bool,
    },
    EnvMapping {
        var_name: "PANELKIT_DEBOUNCE_MS",
        field_path: "templates.debounce_ms",
        kind: FieldKind::Integer,
    },
];

/// Apply every set `PANELKIT_*` variable onto the merged tree.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] when a boolean or integer variable
/// does not parse.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env override"
        );

        let value = coerce(mapping, raw)?;
        set_field(merged, mapping.field_path, value);
        count = count.saturating_add(1);
    }

    Ok(count)
}

fn coerce(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    let trimmed = raw.trim();
    match mapping.kind {
        FieldKind::String => Ok(toml::Value::String(raw.to_owned())),
        FieldKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(ConfigError::EnvError {
                var_name: mapping.var_name.to_owned(),
                message: format!("expected a boolean, got '{raw}'"),
            }),
        },
        FieldKind::Integer => trimmed
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| ConfigError::EnvError {
                var_name: mapping.var_name.to_owned(),
                message: format!("expected an integer, got '{raw}': {e}"),
            }),
    }
}

/// Set a dotted field in the TOML tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        if let Some(table) = root.as_table_mut() {
            table.insert(path.to_owned(), value);
        }
        return;
    };

    let mut current = root;
    for segment in parents.split('.') {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        let child = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        if !child.is_table() {
            *child = toml::Value::Table(toml::map::Map::new());
        }
        current = child;
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn base() -> toml::Value {
        toml::from_str("[logging]\nlevel = \"info\"\n[templates]\nhot_reload = true\n").unwrap()
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut merged = base();
        let env = make_env(&[
            ("PANELKIT_LOG_LEVEL", "debug"),
            ("PANELKIT_HOT_RELOAD", "off"),
            ("UNRELATED", "x"),
        ]);

        let applied = apply_env_overrides(&mut merged, &env).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["templates"]["hot_reload"].as_bool(), Some(false));
    }

    #[test]
    fn test_creates_missing_sections() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let env = make_env(&[
            ("PANELKIT_TEMPLATE_DIR", "ui/panels"),
            ("PANELKIT_DEBOUNCE_MS", "50"),
        ]);

        apply_env_overrides(&mut merged, &env).unwrap();
        assert_eq!(merged["templates"]["directory"].as_str(), Some("ui/panels"));
        assert_eq!(merged["templates"]["debounce_ms"].as_integer(), Some(50));
    }

    #[test]
    fn test_bad_boolean_is_env_error() {
        let mut merged = base();
        let env = make_env(&[("PANELKIT_HOT_RELOAD", "sometimes")]);

        let err = apply_env_overrides(&mut merged, &env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvError { ref var_name, .. } if var_name == "PANELKIT_HOT_RELOAD"
        ));
    }

    #[test]
    fn test_bad_integer_is_env_error() {
        let mut merged = base();
        let env = make_env(&[("PANELKIT_DEBOUNCE_MS", "soon")]);
        assert!(apply_env_overrides(&mut merged, &env).is_err());
    }
}
