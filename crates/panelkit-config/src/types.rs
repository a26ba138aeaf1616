//! Configuration types for panelkit.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header in TOML produces a working
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where templates live and how their files are watched.
    pub templates: TemplatesSection,
    /// Orchestrator cache and activity log.
    pub cache: CacheSection,
    /// Event bus limits.
    pub events: EventsSection,
    /// Parser and builder options.
    pub build: BuildSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// TemplatesSection
// ---------------------------------------------------------------------------

/// Template directory and watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesSection {
    /// Template directory. Relative paths resolve against the workspace root.
    pub directory: PathBuf,
    /// Recognised file name suffixes, without a leading dot, longest first.
    pub extensions: Vec<String>,
    /// Rebuild cached templates when their files change.
    pub hot_reload: bool,
    /// Quiet period before a burst of file events for one path is handled.
    pub debounce_ms: u64,
}

impl TemplatesSection {
    /// Template directory resolved against `root`.
    #[must_use]
    pub fn directory_in(&self, root: &Path) -> PathBuf {
        if self.directory.is_absolute() {
            self.directory.clone()
        } else {
            root.join(&self.directory)
        }
    }

    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Whether `path` carries one of the recognised extensions.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.extensions.iter().any(|ext| {
            name.strip_suffix(ext.as_str())
                .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
        })
    }
}

impl Default for TemplatesSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("panels"),
            extensions: ["panel.yaml", "panel.yml", "yaml", "yml"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            hot_reload: true,
            debounce_ms: 200,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheSection
// ---------------------------------------------------------------------------

/// Orchestrator cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Entries kept in the status activity log.
    pub activity_log_capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            activity_log_capacity: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// EventsSection
// ---------------------------------------------------------------------------

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// Buffer size of the async receiver channel.
    pub channel_capacity: usize,
    /// Nested emissions allowed from inside listeners.
    pub max_emit_depth: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_emit_depth: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// BuildSection
// ---------------------------------------------------------------------------

/// Parser and builder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Deepest component nesting the parser accepts.
    pub max_depth: usize,
    /// Warn about actions no component or event references.
    pub warn_unused_actions: bool,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            max_depth: 32,
            warn_unused_actions: true,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["panelkit_runtime=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_sections_use_defaults() {
        let config: Config = toml::from_str("[templates]\n[cache]\n").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[templates]\nhot_reload = false\n").unwrap();
        assert!(!config.templates.hot_reload);
        assert_eq!(config.templates.debounce_ms, 200);
        assert_eq!(config.templates.directory, PathBuf::from("panels"));
    }

    #[test]
    fn test_directory_in() {
        let section = TemplatesSection::default();
        assert_eq!(
            section.directory_in(Path::new("/work")),
            PathBuf::from("/work/panels")
        );

        let absolute = TemplatesSection {
            directory: PathBuf::from("/srv/panels"),
            ..TemplatesSection::default()
        };
        assert_eq!(
            absolute.directory_in(Path::new("/work")),
            PathBuf::from("/srv/panels")
        );
    }

    #[test]
    fn test_extension_matching() {
        let section = TemplatesSection::default();
        assert!(section.matches(Path::new("a/counter.panel.yaml")));
        assert!(section.matches(Path::new("plain.yml")));
        assert!(!section.matches(Path::new("notes.txt")));
        assert!(!section.matches(Path::new("yaml")));
        assert!(!section.matches(Path::new("config.toml")));
    }
}
