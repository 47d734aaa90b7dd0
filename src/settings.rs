//! Approval settings: reading allow lists, deriving approval levels, and
//! writing newly-approved permissions back with a diff-previewed,
//! idempotent merge.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::signature::matches_approval_pattern;
use crate::stats::{ApprovalLevel, PermissionStats};
use crate::{Error, Result};

/// The `settings.local.json` document, reduced to what the analyzer needs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub permissions: PermissionSettings,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PermissionSettings {
    #[serde(default)]
    pub allow: Vec<String>,
    /// Kept as a list (never `null`) because Claude Code rejects null.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Allow list from the user-level settings file. Missing file means no
/// approvals, not an error.
pub fn load_user_permissions(config: &ScanConfig) -> Result<Vec<String>> {
    load_allow_list(&config.user_settings_path())
}

/// Allow list from a project's `.claude/settings.local.json`.
pub fn load_project_permissions(config: &ScanConfig, project: &Path) -> Result<Vec<String>> {
    load_allow_list(&config.project_settings_path(project))
}

fn load_allow_list(path: &Path) -> Result<Vec<String>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let settings: Settings = serde_json::from_str(&data)?;
    Ok(settings.permissions.allow)
}

/// Where a signature is already approved, user level outranking project.
pub fn approval_level(raw: &str, user_allowed: &[String], project_allowed: &[String]) -> ApprovalLevel {
    if user_allowed.iter().any(|p| matches_approval_pattern(raw, p)) {
        ApprovalLevel::User
    } else if project_allowed.iter().any(|p| matches_approval_pattern(raw, p)) {
        ApprovalLevel::Project
    } else {
        ApprovalLevel::NotApproved
    }
}

/// Stamp approval levels across a freshly aggregated stats slice.
pub fn apply_approval_levels(
    stats: &mut [PermissionStats],
    user_allowed: &[String],
    project_allowed: &[String],
) {
    for stat in stats {
        stat.approved_at = approval_level(&stat.signature.raw, user_allowed, project_allowed);
    }
}

/// Outcome of a settings write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyResult {
    pub file_path: PathBuf,
    pub permission: String,
    /// 1-based line of the permission in the rewritten file (0 when the
    /// write was a no-op).
    pub line_number: usize,
    /// False when the permission was already present (idempotent).
    pub was_new: bool,
}

/// Append a permission to the user-level allow list.
pub fn write_user_permission(config: &ScanConfig, permission: &str) -> Result<ApplyResult> {
    write_permission(&config.user_settings_path(), permission)
}

/// Append a permission to a project's allow list.
pub fn write_project_permission(
    config: &ScanConfig,
    project: &Path,
    permission: &str,
) -> Result<ApplyResult> {
    write_permission(&config.project_settings_path(project), permission)
}

/// Read-merge-write a settings file, appending `permission` to the allow
/// list if absent. A missing file is created; an existing permission makes
/// the call a no-op.
pub fn write_permission(path: &Path, permission: &str) -> Result<ApplyResult> {
    let mut settings = match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str::<Settings>(&data)
            .map_err(|e| Error::Parse(format!("parse settings {}: {e}", path.display())))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
        Err(e) => return Err(Error::Io(e)),
    };

    if settings.permissions.allow.iter().any(|p| p.as_str() == permission) {
        return Ok(ApplyResult {
            file_path: path.to_path_buf(),
            permission: permission.to_string(),
            line_number: 0,
            was_new: false,
        });
    }

    settings.permissions.allow.push(permission.to_string());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let output = serde_json::to_string_pretty(&settings)?;
    std::fs::write(path, &output)?;
    tracing::debug!(path = %path.display(), permission, "Appended permission to settings");

    Ok(ApplyResult {
        file_path: path.to_path_buf(),
        permission: permission.to_string(),
        line_number: find_permission_line(&output, permission),
        was_new: true,
    })
}

/// 1-based line containing the JSON-quoted permission, 0 when absent.
fn find_permission_line(output: &str, permission: &str) -> usize {
    let target = serde_json::to_string(permission).unwrap_or_default();
    output
        .lines()
        .position(|line| line.contains(&target))
        .map(|i| i + 1)
        .unwrap_or(0)
}

/// One line of a merge preview.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffLine {
    /// Line number in the new file; 0 for removed lines and ellipses.
    pub number: usize,
    pub text: String,
    pub status: DiffStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffStatus {
    Context,
    Added,
    Removed,
}

/// Preview the merge of `permissions` into the settings file at `path`.
///
/// Returns the diff lines and whether every permission already exists
/// (in which case the "diff" is the unchanged file).
pub fn preview_diff(path: &Path, permissions: &[String]) -> (Vec<DiffLine>, bool) {
    let data = std::fs::read_to_string(path).unwrap_or_default();
    let mut settings: Settings = serde_json::from_str(&data).unwrap_or_default();

    let new_perms: Vec<&String> = permissions
        .iter()
        .filter(|p| !settings.permissions.allow.contains(*p))
        .collect();

    if new_perms.is_empty() {
        if data.is_empty() {
            return (Vec::new(), true);
        }
        let diff = data
            .lines()
            .enumerate()
            .map(|(i, line)| DiffLine {
                number: i + 1,
                text: line.to_string(),
                status: DiffStatus::Context,
            })
            .collect();
        return (diff, true);
    }

    let old_output = serde_json::to_string_pretty(&settings).unwrap_or_default();
    for perm in new_perms {
        settings.permissions.allow.push(perm.clone());
    }
    let new_output = serde_json::to_string_pretty(&settings).unwrap_or_default();

    let old_lines: Vec<&str> = old_output.lines().collect();
    let new_lines: Vec<&str> = new_output.lines().collect();
    (build_context_diff(&old_lines, &new_lines), false)
}

/// Unified-style diff with two context lines around the changed region.
fn build_context_diff(old_lines: &[&str], new_lines: &[&str]) -> Vec<DiffLine> {
    const CONTEXT_LINES: usize = 2;

    let mut common_prefix = 0;
    while common_prefix < old_lines.len()
        && common_prefix < new_lines.len()
        && old_lines[common_prefix] == new_lines[common_prefix]
    {
        common_prefix += 1;
    }

    let mut common_suffix = 0;
    while common_suffix < old_lines.len() - common_prefix
        && common_suffix < new_lines.len() - common_prefix
        && old_lines[old_lines.len() - 1 - common_suffix]
            == new_lines[new_lines.len() - 1 - common_suffix]
    {
        common_suffix += 1;
    }

    let start_ctx = common_prefix.saturating_sub(CONTEXT_LINES);
    let end_new_ctx = (new_lines.len() - common_suffix + CONTEXT_LINES).min(new_lines.len());

    let mut diff = Vec::new();

    if start_ctx > 0 {
        diff.push(DiffLine {
            number: 0,
            text: "...".to_string(),
            status: DiffStatus::Context,
        });
    }

    for (i, line) in old_lines.iter().enumerate().take(common_prefix).skip(start_ctx) {
        diff.push(DiffLine {
            number: i + 1,
            text: (*line).to_string(),
            status: DiffStatus::Context,
        });
    }

    for (i, line) in old_lines
        .iter()
        .enumerate()
        .take(old_lines.len() - common_suffix)
        .skip(common_prefix)
    {
        diff.push(DiffLine {
            number: i + 1,
            text: (*line).to_string(),
            status: DiffStatus::Removed,
        });
    }

    for (i, line) in new_lines
        .iter()
        .enumerate()
        .take(new_lines.len() - common_suffix)
        .skip(common_prefix)
    {
        diff.push(DiffLine {
            number: i + 1,
            text: (*line).to_string(),
            status: DiffStatus::Added,
        });
    }

    for (i, line) in new_lines
        .iter()
        .enumerate()
        .take(end_new_ctx)
        .skip(new_lines.len() - common_suffix)
    {
        diff.push(DiffLine {
            number: i + 1,
            text: (*line).to_string(),
            status: DiffStatus::Context,
        });
    }

    if end_new_ctx < new_lines.len() {
        diff.push(DiffLine {
            number: 0,
            text: "...".to_string(),
            status: DiffStatus::Context,
        });
    }

    diff
}
