//! Template sources.
//!
//! A [`TemplateSource`] maps a [`SourceKey`] to template text and to a cheap
//! [`Fingerprint`] that changes whenever the text does. The orchestrator
//! compares fingerprints to decide whether a cached artifact is still valid.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;

/// Identity of a template within its source.
///
/// File sources use the path relative to their root, with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceKey(String);

impl SourceKey {
    /// Wrap a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Opaque marker of a source's current content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of literal text (blake3).
    #[must_use]
    pub fn of_text(text: &str) -> Self {
        Self(format!("b3:{}", blake3::hash(text.as_bytes()).to_hex()))
    }

    /// Fingerprint from file metadata.
    #[must_use]
    pub fn of_metadata(modified: Option<Duration>, len: u64) -> Self {
        let nanos = modified.map_or(0, |d| d.as_nanos());
        Self(format!("fs:{nanos}:{len}"))
    }

    /// The fingerprint text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where template text comes from.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Read the full template text.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the template cannot be read;
    /// [`io::ErrorKind::NotFound`] when the key does not exist.
    async fn read(&self, key: &SourceKey) -> io::Result<String>;

    /// Current fingerprint of the template, without reading its text when
    /// the source can avoid it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the template cannot be inspected.
    async fn fingerprint(&self, key: &SourceKey) -> io::Result<Fingerprint>;

    /// Map a watcher path back to a key, or `None` if the path lies outside
    /// this source.
    fn key_for_path(&self, path: &Path) -> Option<SourceKey>;
}

/// Templates stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
}

impl FsSource {
    /// Create a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let canonical_root = root.canonicalize().ok().filter(|c| *c != root);
        Self {
            root,
            canonical_root,
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file behind `key`.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] for keys that are absolute or
    /// climb out of the root.
    pub fn path_for(&self, key: &SourceKey) -> io::Result<PathBuf> {
        let relative = Path::new(key.as_str());
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || key.as_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("template key '{key}' is not a path inside the source root"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl TemplateSource for FsSource {
    async fn read(&self, key: &SourceKey) -> io::Result<String> {
        tokio::fs::read_to_string(self.path_for(key)?).await
    }

    async fn fingerprint(&self, key: &SourceKey) -> io::Result<Fingerprint> {
        let meta = tokio::fs::metadata(self.path_for(key)?).await?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
        Ok(Fingerprint::of_metadata(modified, meta.len()))
    }

    fn key_for_path(&self, path: &Path) -> Option<SourceKey> {
        let relative = path.strip_prefix(&self.root).ok().or_else(|| {
            self.canonical_root
                .as_deref()
                .and_then(|root| path.strip_prefix(root).ok())
        })?;

        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        let parts = parts.filter(|p| !p.is_empty())?;
        Some(SourceKey::new(parts.join("/")))
    }
}

/// Templates held in memory, keyed by name.
///
/// Counts reads so tests can assert how often the orchestrator went back to
/// the source.
#[derive(Debug, Default)]
pub struct MemorySource {
    templates: RwLock<HashMap<SourceKey, String>>,
    reads: AtomicUsize,
    delay: Option<Duration>,
}

impl MemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every read.
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Insert or replace a template.
    pub fn insert(&self, key: impl Into<SourceKey>, text: impl Into<String>) {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), text.into());
    }

    /// Remove a template. Returns whether it existed.
    pub fn remove(&self, key: &SourceKey) -> bool {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Number of completed [`read`](TemplateSource::read) calls.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn get(&self, key: &SourceKey) -> io::Result<String> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no template named '{key}'"))
            })
    }
}

#[async_trait]
impl TemplateSource for MemorySource {
    async fn read(&self, key: &SourceKey) -> io::Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = self.get(key)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(text)
    }

    async fn fingerprint(&self, key: &SourceKey) -> io::Result<Fingerprint> {
        self.get(key).map(|text| Fingerprint::of_text(&text))
    }

    fn key_for_path(&self, path: &Path) -> Option<SourceKey> {
        path.to_str().map(SourceKey::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_fingerprint_tracks_content() {
        assert_eq!(Fingerprint::of_text("a"), Fingerprint::of_text("a"));
        assert_ne!(Fingerprint::of_text("a"), Fingerprint::of_text("b"));
    }

    #[test]
    fn test_fs_key_for_path() {
        let source = FsSource::new("/srv/panels");
        assert_eq!(
            source.key_for_path(Path::new("/srv/panels/team/a.panel.yaml")),
            Some(SourceKey::new("team/a.panel.yaml"))
        );
        assert_eq!(source.key_for_path(Path::new("/elsewhere/a.yaml")), None);
        assert_eq!(source.key_for_path(Path::new("/srv/panels")), None);
    }

    #[test]
    fn test_fs_rejects_escaping_keys() {
        let source = FsSource::new("/srv/panels");
        assert!(source.path_for(&SourceKey::new("../secret.yaml")).is_err());
        assert!(source.path_for(&SourceKey::new("/etc/passwd")).is_err());
        assert!(source.path_for(&SourceKey::new("ok/a.yaml")).is_ok());
    }

    #[tokio::test]
    async fn test_fs_source_reads_and_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "name: a").unwrap();
        let source = FsSource::new(dir.path());
        let key = SourceKey::new("a.yaml");

        assert_eq!(source.read(&key).await.unwrap(), "name: a");
        let first = source.fingerprint(&key).await.unwrap();
        assert_eq!(first, source.fingerprint(&key).await.unwrap());

        std::fs::write(dir.path().join("a.yaml"), "name: longer").unwrap();
        assert_ne!(first, source.fingerprint(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_source_counts_reads_only() {
        let source = MemorySource::new();
        source.insert("a", "name: a");
        let key = SourceKey::new("a");

        source.fingerprint(&key).await.unwrap();
        assert_eq!(source.read_count(), 0);
        source.read(&key).await.unwrap();
        assert_eq!(source.read_count(), 1);

        let missing = source.read(&SourceKey::new("b")).await.unwrap_err();
        assert_eq!(missing.kind(), io::ErrorKind::NotFound);
        assert_eq!(source.read_count(), 1);
    }
}
