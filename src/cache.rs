//! Incremental-scan cache keyed by file metadata fingerprints.
//!
//! One JSON document holds three independent maps: per-session permission
//! stats, per-session agent-id mappings, and per-agent-file stats. An entry
//! is valid only while the source file's fingerprint still matches; a
//! schema version mismatch or parse failure discards the whole cache
//! rather than trusting it partially.
//!
//! Fingerprints are derived from mtime + size, not file contents. A write
//! that preserves both within the mtime resolution window is silently
//! missed; that approximation is what keeps cache validation free of
//! full-file reads.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::stats::PermissionStats;

/// Bump when any cached payload shape changes; old caches are rebuilt.
pub const CACHE_VERSION: u32 = 3;

/// Metadata-derived change-detection key for one file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint the file at `path` from its current mtime and size.
    pub fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime_nanos = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = DefaultHasher::new();
        mtime_nanos.hash(&mut hasher);
        meta.len().hash(&mut hasher);
        Ok(Self(format!("{:016x}", hasher.finish())))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEntry {
    fingerprint: Fingerprint,
    stats: Vec<PermissionStats>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentMappingEntry {
    fingerprint: Fingerprint,
    /// agent id -> declared agent type
    mappings: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentSessionEntry {
    fingerprint: Fingerprint,
    stats: Vec<PermissionStats>,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
}

/// The on-disk scan cache.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCache {
    version: u32,
    #[serde(default)]
    sessions: HashMap<PathBuf, SessionEntry>,
    #[serde(default)]
    agent_mappings: HashMap<PathBuf, AgentMappingEntry>,
    #[serde(default)]
    agent_sessions: HashMap<PathBuf, AgentSessionEntry>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for UsageCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            sessions: HashMap::new(),
            agent_mappings: HashMap::new(),
            agent_sessions: HashMap::new(),
            dirty: false,
        }
    }
}

impl UsageCache {
    /// Load the cache from `path`.
    ///
    /// Never fails: a missing file, unparseable JSON, or stale schema
    /// version all yield a fresh empty cache.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str::<Self>(&data) {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            Ok(cache) => {
                tracing::debug!(
                    found = cache.version,
                    expected = CACHE_VERSION,
                    "Discarding cache with stale schema version"
                );
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable cache");
                Self::default()
            }
        }
    }

    /// Persist the cache to `path` if anything changed this run.
    ///
    /// An all-hits run writes nothing.
    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Whether any `set_*` call happened since load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Cached session stats, if the file at `path` is unchanged.
    pub fn session_stats(&self, path: &Path) -> Option<Vec<PermissionStats>> {
        let current = Fingerprint::of(path).ok()?;
        let entry = self.sessions.get(path)?;
        (entry.fingerprint == current).then(|| entry.stats.clone())
    }

    pub fn set_session_stats(&mut self, path: &Path, stats: Vec<PermissionStats>) {
        let Ok(fingerprint) = Fingerprint::of(path) else {
            return;
        };
        self.sessions
            .insert(path.to_path_buf(), SessionEntry { fingerprint, stats });
        self.dirty = true;
    }

    /// Cached agent-id mappings, if the file at `path` is unchanged.
    pub fn agent_mappings(&self, path: &Path) -> Option<HashMap<String, String>> {
        let current = Fingerprint::of(path).ok()?;
        let entry = self.agent_mappings.get(path)?;
        (entry.fingerprint == current).then(|| entry.mappings.clone())
    }

    pub fn set_agent_mappings(&mut self, path: &Path, mappings: HashMap<String, String>) {
        let Ok(fingerprint) = Fingerprint::of(path) else {
            return;
        };
        self.agent_mappings.insert(
            path.to_path_buf(),
            AgentMappingEntry {
                fingerprint,
                mappings,
            },
        );
        self.dirty = true;
    }

    /// Cached agent-file stats and last-seen, if the file is unchanged.
    pub fn agent_session(
        &self,
        path: &Path,
    ) -> Option<(Vec<PermissionStats>, Option<DateTime<Utc>>)> {
        let current = Fingerprint::of(path).ok()?;
        let entry = self.agent_sessions.get(path)?;
        (entry.fingerprint == current).then(|| (entry.stats.clone(), entry.last_seen))
    }

    pub fn set_agent_session(
        &mut self,
        path: &Path,
        stats: Vec<PermissionStats>,
        last_seen: Option<DateTime<Utc>>,
    ) {
        let Ok(fingerprint) = Fingerprint::of(path) else {
            return;
        };
        self.agent_sessions.insert(
            path.to_path_buf(),
            AgentSessionEntry {
                fingerprint,
                stats,
                last_seen,
            },
        );
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::PermissionSignature;
    use tempfile::TempDir;

    fn sample_stats() -> Vec<PermissionStats> {
        let mut stats = PermissionStats::new(PermissionSignature::parse("Bash(git:*)"));
        stats.count = 4;
        vec![stats]
    }

    #[test]
    fn test_fingerprint_stable_for_unchanged_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jsonl");
        std::fs::write(&file, "line\n").unwrap();

        assert_eq!(Fingerprint::of(&file).unwrap(), Fingerprint::of(&file).unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_size() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jsonl");
        std::fs::write(&file, "line\n").unwrap();
        let before = Fingerprint::of(&file).unwrap();

        std::fs::write(&file, "line\nmore\n").unwrap();
        assert_ne!(before, Fingerprint::of(&file).unwrap());
    }

    #[test]
    fn test_hit_only_while_unchanged() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jsonl");
        std::fs::write(&file, "one\n").unwrap();

        let mut cache = UsageCache::default();
        cache.set_session_stats(&file, sample_stats());
        assert!(cache.session_stats(&file).is_some());

        std::fs::write(&file, "one\ntwo\n").unwrap();
        assert!(cache.session_stats(&file).is_none());
    }

    #[test]
    fn test_miss_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let cache = UsageCache::default();
        assert!(cache.session_stats(&dir.path().join("gone.jsonl")).is_none());
    }

    #[test]
    fn test_save_skipped_when_clean() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("perms-cache.json");

        let cache = UsageCache::default();
        cache.save(&cache_path).unwrap();
        assert!(!cache_path.exists());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jsonl");
        std::fs::write(&file, "one\n").unwrap();
        let cache_path = dir.path().join("perms-cache.json");

        let mut cache = UsageCache::default();
        cache.set_session_stats(&file, sample_stats());
        assert!(cache.is_dirty());
        cache.save(&cache_path).unwrap();

        let reloaded = UsageCache::load(&cache_path);
        assert!(!reloaded.is_dirty());
        let stats = reloaded.session_stats(&file).unwrap();
        assert_eq!(stats[0].count, 4);
    }

    #[test]
    fn test_version_mismatch_discards() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("perms-cache.json");
        std::fs::write(
            &cache_path,
            r#"{"version":1,"sessions":{},"agentMappings":{},"agentSessions":{}}"#,
        )
        .unwrap();

        let cache = UsageCache::load(&cache_path);
        assert_eq!(cache.version, CACHE_VERSION);
        assert!(cache.sessions.is_empty());
    }

    #[test]
    fn test_corrupt_cache_discards() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("perms-cache.json");
        std::fs::write(&cache_path, "{not json").unwrap();

        let cache = UsageCache::load(&cache_path);
        assert!(cache.sessions.is_empty());
    }

    #[test]
    fn test_agent_maps_independent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("s.jsonl");
        std::fs::write(&file, "x\n").unwrap();

        let mut cache = UsageCache::default();
        cache.set_agent_mappings(
            &file,
            HashMap::from([("agent-1".to_string(), "Explore".to_string())]),
        );

        assert!(cache.session_stats(&file).is_none());
        let mappings = cache.agent_mappings(&file).unwrap();
        assert_eq!(mappings["agent-1"], "Explore");
    }
}
