//! Artifact cache and activity log.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use panelkit_builder::BuildArtifact;

use crate::source::{Fingerprint, SourceKey};

/// How a cache entry was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Read from the template source.
    Source,
    /// Supplied directly as text.
    Text,
}

/// A cached build.
///
/// Valid while `fingerprint` matches the source's current fingerprint.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key the artifact was built for.
    pub key: SourceKey,
    /// Fingerprint of the text the artifact was built from.
    pub fingerprint: Fingerprint,
    /// The artifact.
    pub artifact: Arc<BuildArtifact>,
    /// When the artifact was built.
    pub timestamp: DateTime<Utc>,
    /// How the entry was produced.
    pub origin: EntryOrigin,
}

/// Keyed artifact cache.
///
/// Entries are only replaced wholesale; there is no partial update.
#[derive(Debug, Default)]
pub(crate) struct ArtifactCache {
    entries: HashMap<SourceKey, CacheEntry>,
}

impl ArtifactCache {
    pub(crate) fn get(&self, key: &SourceKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    pub(crate) fn remove(&mut self, key: &SourceKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &SourceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop every entry, returning how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// What happened in an [`ActivityEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Served from cache.
    CacheHit,
    /// Built with no errors.
    Built,
    /// Built with errors.
    BuildFailed,
    /// The source could not be read.
    SourceError,
    /// A cache entry was invalidated.
    Invalidated,
    /// A template was evicted after its file was removed.
    Evicted,
    /// The whole cache was cleared.
    CacheCleared,
    /// A build finished after a newer one replaced it and was discarded.
    Superseded,
    /// A named action ran.
    Action,
    /// The file watcher started or stopped.
    Watcher,
}

/// One line of the status activity log.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: ActivityKind,
    /// Template concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<SourceKey>,
    /// Free-form detail.
    pub detail: String,
}

/// Bounded log, most recent first.
#[derive(Debug)]
pub(crate) struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn record(
        &mut self,
        kind: ActivityKind,
        key: Option<&SourceKey>,
        detail: impl Into<String>,
    ) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(ActivityEntry {
            timestamp: Utc::now(),
            kind,
            key: key.cloned(),
            detail: detail.into(),
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_log_is_bounded_and_newest_first() {
        let mut log = ActivityLog::new(3);
        for i in 0..5 {
            log.record(ActivityKind::Built, None, format!("build {i}"));
        }

        let entries = log.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].detail, "build 4");
        assert_eq!(entries[2].detail, "build 2");
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut log = ActivityLog::new(0);
        log.record(ActivityKind::Watcher, None, "a");
        log.record(ActivityKind::Watcher, None, "b");
        assert_eq!(log.snapshot().len(), 1);
    }

    #[test]
    fn test_cache_clear_counts() {
        let mut cache = ArtifactCache::default();
        let artifact = Arc::new(BuildArtifact::failed(None, Vec::new(), Vec::new()));
        for key in ["a", "b"] {
            cache.insert(CacheEntry {
                key: SourceKey::new(key),
                fingerprint: Fingerprint::of_text(key),
                artifact: Arc::clone(&artifact),
                timestamp: Utc::now(),
                origin: EntryOrigin::Source,
            });
        }
        assert!(cache.contains(&SourceKey::new("a")));
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.len(), 0);
    }
}
