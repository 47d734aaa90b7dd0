//! Walking the projects directory and merging per-file scan results.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::cache::UsageCache;
use crate::progress::{ProgressSink, abbreviate_session};
use crate::scanner::scan_session_log;
use crate::stats::PermissionStats;
use crate::{Error, Result};

/// `sessions-index.json`: which session logs a project directory holds.
#[derive(Debug, Deserialize)]
struct SessionsIndex {
    #[serde(default)]
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    entries: Vec<SessionIndexEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionIndexEntry {
    session_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    full_path: Option<String>,
    /// Epoch milliseconds; fallback when `modified` is unusable.
    #[serde(default)]
    file_mtime: i64,
    #[serde(default)]
    modified: Option<String>,
}

impl SessionIndexEntry {
    /// Session-level fallback timestamp: the explicit modified stamp,
    /// else the indexed file mtime.
    fn fallback_time(&self) -> Option<DateTime<Utc>> {
        if let Some(modified) = self.modified.as_deref()
            && let Ok(t) = DateTime::parse_from_rfc3339(modified)
        {
            return Some(t.with_timezone(&Utc));
        }
        Utc.timestamp_millis_opt(self.file_mtime).single()
    }
}

fn load_sessions_index(path: &Path) -> Result<Vec<SessionIndexEntry>> {
    let data = std::fs::read_to_string(path)?;
    let index: SessionsIndex = serde_json::from_str(&data)?;
    Ok(index.entries)
}

/// Decode a path-encoded project directory name back to a readable path.
///
/// `-Users-alice-code-app` -> `/Users/alice/code/app`; a name with no
/// leading marker decodes separators without becoming absolute.
pub fn decode_project_path(encoded: &str) -> String {
    match encoded.strip_prefix('-') {
        Some(rest) => format!("/{}", rest.replace('-', "/")),
        None => encoded.replace('-', "/"),
    }
}

/// Scan every project's session logs under `projects_dir` and merge the
/// per-file stats into global per-signature totals.
///
/// Per-file results come from `cache` when the file is unchanged; misses
/// are scanned and written back (the caller persists the cache). A missing
/// projects directory yields an empty result; any other error opening it
/// fails the run. Unreadable projects and session files are skipped.
pub fn load_permission_stats(
    projects_dir: &Path,
    cache: &mut UsageCache,
    progress: &dyn ProgressSink,
) -> Result<Vec<PermissionStats>> {
    let entries = match std::fs::read_dir(projects_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut merged: HashMap<String, PermissionStats> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut cache_hits = 0usize;
    let mut cache_misses = 0usize;

    for entry in entries {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let project_path = entry.path();
        let project_name = decode_project_path(&entry.file_name().to_string_lossy());
        progress.notify(&project_name);

        let index_path = project_path.join("sessions-index.json");
        let sessions = match load_sessions_index(&index_path) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::debug!(project = %project_name, error = %e, "Skipping project without usable index");
                continue;
            }
        };

        for session in sessions {
            progress.notify(&format!("session:{}", abbreviate_session(&session.session_id)));

            let session_path = project_path.join(format!("{}.jsonl", session.session_id));

            let stats = match cache.session_stats(&session_path) {
                Some(stats) => {
                    cache_hits += 1;
                    stats
                }
                None => {
                    let stats = match scan_session_log(&session_path, session.fallback_time()) {
                        Ok(stats) => stats,
                        Err(e) => {
                            tracing::debug!(path = %session_path.display(), error = %e, "Skipping unreadable session log");
                            continue;
                        }
                    };
                    cache.set_session_stats(&session_path, stats.clone());
                    cache_misses += 1;
                    stats
                }
            };

            for file_stats in stats {
                let slot = merged
                    .entry(file_stats.signature.raw.clone())
                    .or_insert_with(|| {
                        order.push(file_stats.signature.raw.clone());
                        PermissionStats::new(file_stats.signature.clone())
                    });
                slot.absorb(&file_stats);
                slot.projects.insert(project_name.clone());
            }
        }
    }

    progress.notify(&format!("Cache: {cache_hits} hits, {cache_misses} misses"));

    let mut stats: Vec<PermissionStats> = order
        .into_iter()
        .filter_map(|raw| merged.remove(&raw))
        .collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count));
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use tempfile::TempDir;

    fn seed_project(projects: &Path, encoded: &str, sessions: &[(&str, &str)]) {
        let dir = projects.join(encoded);
        std::fs::create_dir_all(&dir).unwrap();

        let entries: Vec<String> = sessions
            .iter()
            .map(|(id, _)| {
                format!(
                    r#"{{"sessionId":"{id}","fullPath":"{}","fileMtime":1740000000000,"modified":"2025-03-01T10:00:00Z"}}"#,
                    dir.join(format!("{id}.jsonl")).display()
                )
            })
            .collect();
        std::fs::write(
            dir.join("sessions-index.json"),
            format!(r#"{{"version":1,"entries":[{}]}}"#, entries.join(",")),
        )
        .unwrap();

        for (id, body) in sessions {
            std::fs::write(dir.join(format!("{id}.jsonl")), body).unwrap();
        }
    }

    fn bash_use(id: &str, command: &str) -> String {
        format!(
            r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","id":"{id}","name":"Bash","input":{{"command":"{command}"}}}}]}}}}"#
        )
    }

    #[test]
    fn test_decode_project_path() {
        assert_eq!(
            decode_project_path("-Users-satchmo-code-myproject"),
            "/Users/satchmo/code/myproject"
        );
        assert_eq!(decode_project_path("-test-project"), "/test/project");
        assert_eq!(decode_project_path("local-project"), "local/project");
    }

    #[test]
    fn test_missing_projects_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut cache = UsageCache::default();
        let stats =
            load_permission_stats(&dir.path().join("absent"), &mut cache, &NoopProgress).unwrap();
        assert!(stats.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_merge_across_projects() {
        let dir = TempDir::new().unwrap();
        let log_a = format!("{}\n{}", bash_use("t1", "git status"), bash_use("t2", "git status"));
        let log_b = bash_use("t1", "git status");
        seed_project(dir.path(), "-proj-a", &[("s1", &log_a)]);
        seed_project(dir.path(), "-proj-b", &[("s2", &log_b)]);

        let mut cache = UsageCache::default();
        let stats = load_permission_stats(dir.path(), &mut cache, &NoopProgress).unwrap();

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].signature.raw, "Bash(git status:*)");
        assert_eq!(stats[0].count, 3);
        assert_eq!(
            stats[0].projects.iter().collect::<Vec<_>>(),
            ["/proj/a", "/proj/b"]
        );
    }

    #[test]
    fn test_sorted_descending_by_count() {
        let dir = TempDir::new().unwrap();
        let log = format!(
            "{}\n{}\n{}",
            bash_use("t1", "ls"),
            bash_use("t2", "ls"),
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t3","name":"Read","input":{}}]}}"#
        );
        seed_project(dir.path(), "-p", &[("s1", &log)]);

        let mut cache = UsageCache::default();
        let stats = load_permission_stats(dir.path(), &mut cache, &NoopProgress).unwrap();
        assert_eq!(stats[0].signature.raw, "Bash(ls:*)");
        assert_eq!(stats[0].count, 2);
        assert_eq!(stats[1].signature.raw, "Read");
    }

    #[test]
    fn test_broken_index_skips_project_only() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "-good", &[("s1", &bash_use("t1", "ls"))]);

        let bad = dir.path().join("-bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("sessions-index.json"), "{broken").unwrap();

        let mut cache = UsageCache::default();
        let stats = load_permission_stats(dir.path(), &mut cache, &NoopProgress).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].projects.iter().collect::<Vec<_>>(), ["/good"]);
    }

    #[test]
    fn test_missing_session_file_skipped() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("-p");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join("sessions-index.json"),
            r#"{"version":1,"entries":[{"sessionId":"ghost","fileMtime":0}]}"#,
        )
        .unwrap();

        let mut cache = UsageCache::default();
        let stats = load_permission_stats(dir.path(), &mut cache, &NoopProgress).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn test_second_run_hits_cache() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "-p", &[("s1", &bash_use("t1", "ls"))]);
        let cache_path = dir.path().join("perms-cache.json");

        let mut cache = UsageCache::default();
        let first = load_permission_stats(dir.path(), &mut cache, &NoopProgress).unwrap();
        assert!(cache.is_dirty());
        cache.save(&cache_path).unwrap();

        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let mut cache = UsageCache::load(&cache_path);
        let second = load_permission_stats(dir.path(), &mut cache, &tx).unwrap();

        assert_eq!(first, second);
        assert!(!cache.is_dirty(), "all-hits run must not dirty the cache");
        let summary: Vec<String> = rx.try_iter().filter(|m| m.starts_with("Cache:")).collect();
        assert_eq!(summary, ["Cache: 1 hits, 0 misses"]);
    }

    #[test]
    fn test_changed_file_forces_rescan() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "-p", &[("s1", &bash_use("t1", "ls"))]);

        let mut cache = UsageCache::default();
        load_permission_stats(dir.path(), &mut cache, &NoopProgress).unwrap();

        let log = dir.path().join("-p").join("s1.jsonl");
        let grown = format!("{}\n{}", bash_use("t1", "ls"), bash_use("t2", "ls"));
        std::fs::write(&log, grown).unwrap();

        let stats = load_permission_stats(dir.path(), &mut cache, &NoopProgress).unwrap();
        assert_eq!(stats[0].count, 2);
    }

    #[test]
    fn test_fallback_time_prefers_modified() {
        let entry = SessionIndexEntry {
            session_id: "s".into(),
            full_path: None,
            file_mtime: 1_600_000_000_000,
            modified: Some("2025-03-01T10:00:00Z".into()),
        };
        assert_eq!(
            entry.fallback_time().unwrap().to_rfc3339(),
            "2025-03-01T10:00:00+00:00"
        );

        let entry = SessionIndexEntry {
            session_id: "s".into(),
            full_path: None,
            file_mtime: 1_600_000_000_000,
            modified: Some("not a timestamp".into()),
        };
        assert_eq!(
            entry.fallback_time().unwrap().timestamp_millis(),
            1_600_000_000_000
        );
    }
}
