//! Attributing tool usage to the sub-agent type that issued it.
//!
//! A sub-agent's own invocations live in a separate `agent-<id>.jsonl`
//! file, but the event naming its type (the `Task` launch) and the event
//! carrying its ephemeral id (the launch's result, via the side-channel
//! `toolUseResult.agentId` field) are both in the parent session's log.
//! Recovering the association takes two passes over the file set:
//!
//! 1. scan every non-agent session log for `Task` launches, holding each
//!    launch's declared type as *pending* until a result referencing its
//!    `tool_use_id` surfaces the spawned agent's id;
//! 2. scan every agent log, counting its invocations and resolving the
//!    file's own id through the phase-1 mapping (`"Unknown"` when the
//!    launch was never correlated).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::aggregate::decode_project_path;
use crate::cache::UsageCache;
use crate::progress::{ProgressSink, abbreviate_session};
use crate::scanner::{as_tool_result, as_tool_use, content_items, entry_timestamp};
use crate::signature::{PermissionSignature, derive_signature};
use crate::stats::{AgentUsageStats, PermissionStats};
use crate::{Error, Result};

/// The sub-agent launch tool. Its own use inside an agent log is not a
/// resource permission and is excluded from attribution.
const LAUNCH_TOOL: &str = "Task";

/// Sentinel type for agent ids the mapping pass never resolved.
const UNKNOWN_AGENT: &str = "Unknown";

/// Accumulates usage for one agent type across files.
#[derive(Default)]
struct AgentAccumulator {
    permissions: HashMap<String, PermissionStats>,
    sessions: HashSet<PathBuf>,
    projects: BTreeSet<String>,
    last_seen: Option<DateTime<Utc>>,
}

/// Group tool usage by the sub-agent type that issued it.
///
/// Both phases consult `cache` per file; the caller persists it. Sorted
/// descending by total call count.
pub fn load_agent_usage(
    projects_dir: &Path,
    cache: &mut UsageCache,
    progress: &dyn ProgressSink,
) -> Result<Vec<AgentUsageStats>> {
    let project_dirs = list_project_dirs(projects_dir)?;

    // Phase 1: agent id -> declared type, from parent session logs.
    let mut agent_types: HashMap<String, String> = HashMap::new();
    for (dir, name) in &project_dirs {
        progress.notify(name);

        for session_file in glob_files(&dir.join("*.jsonl")) {
            if is_agent_log(&session_file) {
                continue;
            }

            if let Some(cached) = cache.agent_mappings(&session_file) {
                agent_types.extend(cached);
                continue;
            }

            if let Some(stem) = session_file.file_stem().and_then(|s| s.to_str()) {
                progress.notify(&format!("session:{}", abbreviate_session(stem)));
            }

            let mappings = extract_agent_mappings(&session_file);
            agent_types.extend(mappings.clone());
            cache.set_agent_mappings(&session_file, mappings);
        }
    }

    // Phase 2: count each agent log's invocations under its resolved type.
    let mut accumulators: HashMap<String, AgentAccumulator> = HashMap::new();
    for (dir, name) in &project_dirs {
        progress.notify(name);

        let mut agent_files = glob_files(&dir.join("agent-*.jsonl"));
        agent_files.extend(glob_files(&dir.join("*/subagents/agent-*.jsonl")));

        for agent_file in agent_files {
            let Some(agent_id) = agent_id_from_path(&agent_file) else {
                continue;
            };

            let (stats, file_last_seen) = match cache.agent_session(&agent_file) {
                Some(cached) => cached,
                None => {
                    let parsed = scan_agent_log(&agent_file);
                    cache.set_agent_session(&agent_file, parsed.0.clone(), parsed.1);
                    parsed
                }
            };

            let agent_type = agent_types
                .get(&agent_id)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_AGENT);

            let acc = accumulators.entry(agent_type.to_string()).or_default();
            acc.sessions.insert(agent_file.clone());
            acc.projects.insert(name.clone());
            for stat in stats {
                acc.permissions
                    .entry(stat.signature.raw.clone())
                    .or_insert_with(|| PermissionStats::new(stat.signature.clone()))
                    .absorb(&stat);
            }
            if let Some(at) = file_last_seen
                && acc.last_seen.is_none_or(|seen| at > seen)
            {
                acc.last_seen = Some(at);
            }
        }
    }

    let mut result: Vec<AgentUsageStats> = accumulators
        .into_iter()
        .map(|(agent_type, acc)| {
            let mut permissions: Vec<PermissionStats> = acc.permissions.into_values().collect();
            permissions.sort_by(|a, b| b.count.cmp(&a.count));
            let total_calls = permissions.iter().map(|p| p.count).sum();

            AgentUsageStats {
                agent_type,
                permissions,
                total_calls,
                last_seen: acc.last_seen,
                sessions: acc.sessions.len(),
                projects: acc.projects,
            }
        })
        .collect();
    result.sort_by(|a, b| b.total_calls.cmp(&a.total_calls));
    Ok(result)
}

/// Immediate subdirectories of the projects dir with their decoded names.
fn list_project_dirs(projects_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let entries = match std::fs::read_dir(projects_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            let name = decode_project_path(&entry.file_name().to_string_lossy());
            dirs.push((entry.path(), name));
        }
    }
    Ok(dirs)
}

fn glob_files(pattern: &Path) -> Vec<PathBuf> {
    let Some(pattern) = pattern.to_str() else {
        return Vec::new();
    };
    glob::glob(pattern)
        .map(|paths| paths.flatten().collect())
        .unwrap_or_default()
}

fn is_agent_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("agent-"))
}

/// The ephemeral agent id encoded in an `agent-<id>.jsonl` filename.
fn agent_id_from_path(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())?
        .strip_prefix("agent-")?
        .strip_suffix(".jsonl")
        .map(String::from)
}

/// Phase 1 over a single parent session log.
///
/// `Task` launches go into a pending map keyed by `tool_use_id`; a result
/// carrying `toolUseResult.agentId` promotes the matching pending entry to
/// a durable id -> type mapping. Pendings left at EOF are dropped (their
/// agents end up in the Unknown bucket).
fn extract_agent_mappings(path: &Path) -> HashMap<String, String> {
    let mut mappings = HashMap::new();
    let Ok(file) = File::open(path) else {
        return mappings;
    };
    let reader = BufReader::with_capacity(64 * 1024, file);

    let mut pending: HashMap<String, String> = HashMap::new();

    for line in reader.lines() {
        let Ok(line) = line else { break };

        if !line.contains("\"Task\"")
            && !line.contains("\"subagent_type\"")
            && !line.contains("\"tool_result\"")
            && !line.contains("\"toolUseResult\"")
        {
            continue;
        }

        let Ok(entry) = serde_json::from_str::<Value>(&line) else {
            continue;
        };

        match entry.get("type").and_then(|v| v.as_str()) {
            Some("assistant") => {
                for item in content_items(&entry) {
                    let Some((id, name, input)) = as_tool_use(item) else {
                        continue;
                    };
                    if name != LAUNCH_TOOL || id.is_empty() {
                        continue;
                    }
                    if let Some(declared) = input.get("subagent_type").and_then(|v| v.as_str())
                        && !declared.is_empty()
                    {
                        pending.insert(id.to_string(), declared.to_string());
                    }
                }
            }
            Some("user") => {
                let Some(agent_id) = entry
                    .get("toolUseResult")
                    .and_then(|r| r.get("agentId"))
                    .and_then(|v| v.as_str())
                else {
                    continue;
                };

                for item in content_items(&entry) {
                    let Some((tool_use_id, _, _)) = as_tool_result(item) else {
                        continue;
                    };
                    if let Some(agent_type) = pending.remove(tool_use_id) {
                        mappings.insert(agent_id.to_string(), agent_type);
                    }
                }
            }
            _ => {}
        }
    }

    mappings
}

/// Phase 2 over a single agent log: invocations only.
///
/// Results are ignored entirely (outcomes are not attributed per agent)
/// and the launch tool itself is excluded. Also returns the file-wide
/// most recent invocation timestamp.
fn scan_agent_log(path: &Path) -> (Vec<PermissionStats>, Option<DateTime<Utc>>) {
    let Ok(file) = File::open(path) else {
        return (Vec::new(), None);
    };
    let reader = BufReader::with_capacity(64 * 1024, file);

    let mut stats: HashMap<String, PermissionStats> = HashMap::new();
    let mut file_last_seen: Option<DateTime<Utc>> = None;

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if !line.contains("\"tool_use\"") {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if entry.get("type").and_then(|v| v.as_str()) != Some("assistant") {
            continue;
        }

        let seen_at = entry_timestamp(&entry);

        for item in content_items(&entry) {
            let Some((_, name, input)) = as_tool_use(item) else {
                continue;
            };
            if name == LAUNCH_TOOL {
                continue;
            }

            let raw = derive_signature(name, input);
            let stat = stats
                .entry(raw.clone())
                .or_insert_with(|| PermissionStats::new(PermissionSignature::parse(&raw)));
            stat.count += 1;
            stat.bump_last_seen(seen_at);

            if let Some(at) = seen_at
                && file_last_seen.is_none_or(|seen| at > seen)
            {
                file_last_seen = Some(at);
            }
        }
    }

    (stats.into_values().collect(), file_last_seen)
}
