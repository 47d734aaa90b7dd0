//! Session log scanning and invocation/result correlation.
//!
//! A session log is line-delimited JSON: `assistant` records carry
//! `tool_use` content items (the invocations), `user` records carry
//! `tool_result` items answering them by id. Results can land many lines
//! after their invocation, so the scanner keeps an id -> signature map for
//! the whole file and classifies outcomes as results arrive.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::Result;
use crate::signature::{PermissionSignature, derive_signature};
use crate::stats::PermissionStats;

/// Substring of the error text Claude Code writes when the user rejects a
/// tool call. An error result without it is an execution failure, which
/// counts as neither approved nor denied.
pub const REJECTION_MARKER: &str = "rejected";

/// Per-signature accumulator local to one file.
#[derive(Default)]
struct SignatureTally {
    count: u64,
    approved: u64,
    denied: u64,
    last_seen: Option<DateTime<Utc>>,
}

/// Scan one session log and return per-signature stats for that file.
///
/// `fallback` stands in for records without their own timestamp (usually
/// the session's modified time from the index). The returned stats carry
/// empty project sets; the aggregator fills those in.
pub fn scan_session_log(
    path: &Path,
    fallback: Option<DateTime<Utc>>,
) -> Result<Vec<PermissionStats>> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(64 * 1024, file);

    let mut tallies: HashMap<String, SignatureTally> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    // invocation id -> signature raw, for correlating later results
    let mut invocations: HashMap<String, String> = HashMap::new();

    for line in reader.lines() {
        // A read error mid-file (truncated tail) ends the scan with
        // whatever was gathered so far.
        let Ok(line) = line else { break };

        // Cheap pre-filter before paying for a full parse.
        if !line.contains("\"tool_use\"") && !line.contains("\"tool_result\"") {
            continue;
        }

        let Ok(entry) = serde_json::from_str::<Value>(&line) else {
            tracing::debug!(path = %path.display(), "Skipping malformed log line");
            continue;
        };

        let seen_at = entry_timestamp(&entry).or(fallback);

        match entry.get("type").and_then(|v| v.as_str()) {
            Some("assistant") => {
                for item in content_items(&entry) {
                    let Some((id, name, input)) = as_tool_use(item) else {
                        continue;
                    };

                    let raw = derive_signature(name, input);
                    let tally = tallies.entry(raw.clone()).or_insert_with(|| {
                        order.push(raw.clone());
                        SignatureTally::default()
                    });
                    tally.count += 1;
                    if let Some(at) = seen_at
                        && tally.last_seen.is_none_or(|seen| at > seen)
                    {
                        tally.last_seen = Some(at);
                    }

                    if !id.is_empty() {
                        invocations.insert(id.to_string(), raw);
                    }
                }
            }
            Some("user") => {
                for item in content_items(&entry) {
                    let Some((tool_use_id, is_error, content)) = as_tool_result(item) else {
                        continue;
                    };
                    // A result for an invocation we never saw cannot be
                    // attributed.
                    let Some(raw) = invocations.get(tool_use_id) else {
                        continue;
                    };
                    let Some(tally) = tallies.get_mut(raw) else {
                        continue;
                    };

                    if !is_error {
                        tally.approved += 1;
                    } else if result_text(content).contains(REJECTION_MARKER) {
                        tally.denied += 1;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(order
        .into_iter()
        .map(|raw| {
            let tally = &tallies[&raw];
            let mut stats = PermissionStats::new(PermissionSignature::parse(&raw));
            stats.count = tally.count;
            stats.approved = tally.approved;
            stats.denied = tally.denied;
            stats.last_seen = tally.last_seen;
            stats
        })
        .collect())
}

/// RFC3339 timestamp of a log record, if present and parseable.
pub(crate) fn entry_timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// The content items of a record's message body, or empty.
pub(crate) fn content_items(entry: &Value) -> impl Iterator<Item = &Value> {
    entry
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .map(|a| a.iter())
        .into_iter()
        .flatten()
}

/// Destructure a `tool_use` content item into (id, name, input).
pub(crate) fn as_tool_use(item: &Value) -> Option<(&str, &str, &Value)> {
    if item.get("type").and_then(|v| v.as_str()) != Some("tool_use") {
        return None;
    }
    let name = item.get("name").and_then(|v| v.as_str())?;
    if name.is_empty() {
        return None;
    }
    let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
    Some((id, name, item.get("input").unwrap_or(&Value::Null)))
}

/// Destructure a `tool_result` content item into (tool_use_id, is_error,
/// content payload).
pub(crate) fn as_tool_result(item: &Value) -> Option<(&str, bool, &Value)> {
    if item.get("type").and_then(|v| v.as_str()) != Some("tool_result") {
        return None;
    }
    let tool_use_id = item.get("tool_use_id").and_then(|v| v.as_str())?;
    let is_error = item
        .get("is_error")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Some((tool_use_id, is_error, item.get("content").unwrap_or(&Value::Null)))
}

/// Flatten a result's content payload (plain string, or a list of items
/// with `text` fields) into one searchable string.
fn result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_log(lines: &[&str]) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        (dir, path)
    }

    fn tool_use_line(id: &str, name: &str, input: &str) -> String {
        format!(
            r#"{{"type":"assistant","timestamp":"2025-03-01T10:00:00Z","message":{{"role":"assistant","content":[{{"type":"tool_use","id":"{id}","name":"{name}","input":{input}}}]}}}}"#
        )
    }

    fn tool_result_line(id: &str, is_error: bool, text: &str) -> String {
        format!(
            r#"{{"type":"user","message":{{"role":"user","content":[{{"type":"tool_result","tool_use_id":"{id}","is_error":{is_error},"content":"{text}"}}]}}}}"#
        )
    }

    #[test]
    fn test_approved_invocation() {
        let use_line = tool_use_line("t1", "Bash", r#"{"command":"curl -s https://example.com"}"#);
        let result_line = tool_result_line("t1", false, "fetched 200 OK");
        let (_dir, path) = write_log(&[&use_line, &result_line]);

        let stats = scan_session_log(&path, None).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].signature.raw, "Bash(curl:*)");
        assert_eq!(stats[0].count, 1);
        assert_eq!(stats[0].approved, 1);
        assert_eq!(stats[0].denied, 0);
    }

    #[test]
    fn test_rejected_invocation() {
        let use_line = tool_use_line("t1", "Bash", r#"{"command":"curl -s https://example.com"}"#);
        let result_line = tool_result_line("t1", true, "The user rejected this tool use");
        let (_dir, path) = write_log(&[&use_line, &result_line]);

        let stats = scan_session_log(&path, None).unwrap();
        assert_eq!(stats[0].count, 1);
        assert_eq!(stats[0].approved, 0);
        assert_eq!(stats[0].denied, 1);
    }

    #[test]
    fn test_execution_failure_counts_neither() {
        let use_line = tool_use_line("t1", "Bash", r#"{"command":"curl -s https://example.com"}"#);
        let result_line = tool_result_line("t1", true, "connection timed out");
        let (_dir, path) = write_log(&[&use_line, &result_line]);

        let stats = scan_session_log(&path, None).unwrap();
        assert_eq!(stats[0].count, 1);
        assert_eq!(stats[0].approved, 0);
        assert_eq!(stats[0].denied, 0);
    }

    #[test]
    fn test_unknown_result_ignored() {
        let result_line = tool_result_line("never-seen", false, "ok");
        let (_dir, path) = write_log(&[&result_line]);

        let stats = scan_session_log(&path, None).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn test_compound_command_signatures() {
        let flagged = tool_use_line("t1", "Bash", r#"{"command":"git -C /repo status"}"#);
        let compound = tool_use_line("t2", "Bash", r#"{"command":"git status"}"#);
        let (_dir, path) = write_log(&[&flagged, &compound]);

        let stats = scan_session_log(&path, None).unwrap();
        let raws: Vec<&str> = stats.iter().map(|s| s.signature.raw.as_str()).collect();
        assert!(raws.contains(&"Bash(git:*)"));
        assert!(raws.contains(&"Bash(git status:*)"));
    }

    #[test]
    fn test_structured_result_content() {
        let use_line = tool_use_line("t1", "Write", r#"{"file_path":"/tmp/x"}"#);
        let result_line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","is_error":true,"content":[{"type":"text","text":"The user rejected the write"}]}]}}"#;
        let (_dir, path) = write_log(&[&use_line, result_line]);

        let stats = scan_session_log(&path, None).unwrap();
        assert_eq!(stats[0].denied, 1);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let use_line = tool_use_line("t1", "Read", r#"{"file_path":"/tmp/x"}"#);
        let (_dir, path) = write_log(&[
            "{truncated \"tool_use\"",
            &use_line,
            r#"{"type":"assistant","message":"tool_use but wrong shape"}"#,
        ]);

        let stats = scan_session_log(&path, None).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].signature.raw, "Read");
    }

    #[test]
    fn test_timestamps_prefer_entry_over_fallback() {
        let use_line = tool_use_line("t1", "Read", r#"{}"#);
        let (_dir, path) = write_log(&[&use_line]);

        let fallback = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let stats = scan_session_log(&path, Some(fallback)).unwrap();
        assert_eq!(
            stats[0].last_seen.unwrap().to_rfc3339(),
            "2025-03-01T10:00:00+00:00"
        );
    }

    #[test]
    fn test_fallback_timestamp_used_when_missing() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Read","input":{}}]}}"#;
        let (_dir, path) = write_log(&[line]);

        let fallback = DateTime::parse_from_rfc3339("2024-05-05T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let stats = scan_session_log(&path, Some(fallback)).unwrap();
        assert_eq!(stats[0].last_seen, Some(fallback));
    }

    #[test]
    fn test_classified_never_exceeds_count() {
        let use_line = tool_use_line("t1", "Grep", r#"{"pattern":"x"}"#);
        let r1 = tool_result_line("t1", false, "match");
        // Second result for the same id still attributes to one invocation
        let r2 = tool_result_line("t2", false, "unmatched id");
        let (_dir, path) = write_log(&[&use_line, &r1, &r2]);

        let stats = scan_session_log(&path, None).unwrap();
        assert!(stats[0].approved + stats[0].denied <= stats[0].count);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(scan_session_log(&dir.path().join("absent.jsonl"), None).is_err());
    }
}
