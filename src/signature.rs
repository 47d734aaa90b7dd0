//! Permission signature parsing and derivation.
//!
//! A signature is the normalized string form of a permission as it appears
//! in `settings.local.json` allow lists: a tool family optionally narrowed
//! by a parenthesized scope, e.g. `Bash(git:*)`, `Skill(commit)`, `Read`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Matches signatures like `Bash(curl:*)` or `Write`.
static SIGNATURE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)(?:\(([^)]+)\))?$").expect("valid signature regex"));

/// Commands whose second word narrows the permission: `git status`,
/// `cargo build`, `npm run`, etc.
const COMPOUND_COMMANDS: [&str; 7] = ["go", "npm", "bun", "yarn", "cargo", "git", "docker"];

/// A parsed permission signature.
///
/// `raw` is the canonical storage form; `family` and `scope` are the
/// structural parts. Parsing `raw` always reproduces the same parts, so
/// signatures round-trip through their string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionSignature {
    pub family: String,
    #[serde(default)]
    pub scope: String,
    pub raw: String,
}

impl PermissionSignature {
    /// Parse a signature string.
    ///
    /// Input that does not match the structural pattern is not an error:
    /// the whole string becomes an opaque family with an empty scope, so
    /// arbitrary future tool names degrade gracefully.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        match SIGNATURE_PATTERN.captures(raw) {
            Some(caps) => Self {
                family: caps[1].to_string(),
                scope: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                raw: raw.to_string(),
            },
            None => Self {
                family: raw.to_string(),
                scope: String::new(),
                raw: raw.to_string(),
            },
        }
    }

    /// Parse a list of signature strings.
    pub fn parse_all<S: AsRef<str>>(raws: &[S]) -> Vec<Self> {
        raws.iter().map(|r| Self::parse(r.as_ref())).collect()
    }

    /// Rebuild the canonical string form from the structural parts.
    pub fn to_raw(&self) -> String {
        if self.scope.is_empty() {
            self.family.clone()
        } else {
            format!("{}({})", self.family, self.scope)
        }
    }
}

impl std::fmt::Display for PermissionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Derive the canonical signature string for a concrete tool invocation.
///
/// - `Bash` + `{"command": "curl https://..."}` -> `Bash(curl:*)`
/// - `Skill` + `{"skill": "commit"}` -> `Skill(commit)`
/// - anything else (or an empty payload) -> the bare tool name
pub fn derive_signature(tool_name: &str, input: &Value) -> String {
    match tool_name {
        "Bash" => {
            if let Some(command) = input.get("command").and_then(|v| v.as_str())
                && let Some(cmd) = extract_bash_command(command)
            {
                return format!("Bash({cmd}:*)");
            }
        }
        "Skill" => {
            if let Some(skill) = input.get("skill").and_then(|v| v.as_str())
                && !skill.is_empty()
            {
                return format!("Skill({skill})");
            }
        }
        // Read, Write, Edit, Glob, Grep, etc. carry no scope in settings format
        _ => {}
    }

    tool_name.to_string()
}

/// Extract the command name from shell command text.
///
/// `"curl https://api.example.com"` -> `curl`; `"git -C /path status"` ->
/// `git` (flags never join a compound); `"go build ./..."` -> `go build`.
fn extract_bash_command(command: &str) -> Option<String> {
    let mut words = command.split_whitespace();
    let first = words.next()?;

    if COMPOUND_COMMANDS.contains(&first)
        && let Some(second) = words.next()
        && !second.starts_with('-')
    {
        return Some(format!("{first} {second}"));
    }

    Some(first.to_string())
}

/// Check whether an observed signature is covered by an approval pattern.
///
/// Exact string match wins; otherwise the families must be equal and a
/// pattern scope of `*` (or none) covers any observed scope, while any
/// other pattern scope must match exactly.
pub fn matches_approval_pattern(signature: &str, pattern: &str) -> bool {
    if signature == pattern {
        return true;
    }

    let sig = PermissionSignature::parse(signature);
    let pat = PermissionSignature::parse(pattern);

    if sig.family != pat.family {
        return false;
    }

    pat.scope == "*" || pat.scope.is_empty() || sig.scope == pat.scope
}
