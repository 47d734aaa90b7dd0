//! One-call orchestration of the full analysis pipeline.

use std::path::Path;

use crate::aggregate::load_permission_stats;
use crate::agents::load_agent_usage;
use crate::cache::UsageCache;
use crate::config::ScanConfig;
use crate::grouping::group_permissions;
use crate::progress::ProgressSink;
use crate::settings::{apply_approval_levels, load_project_permissions, load_user_permissions};
use crate::stats::{AgentUsageStats, PermissionGroup, PermissionStats};
use crate::Result;

/// Everything one analysis run produces.
#[derive(Clone, Debug)]
pub struct UsageReport {
    /// Flat per-signature stats, descending by count, approval stamped.
    pub permissions: Vec<PermissionStats>,
    /// The same stats collapsed by family.
    pub groups: Vec<PermissionGroup>,
    /// Usage attributed per sub-agent type.
    pub agents: Vec<AgentUsageStats>,
}

/// Run the whole pipeline: load the cache once, aggregate permission and
/// agent usage, stamp approval levels from the user settings (and
/// `project`'s settings when given), and persist the cache once at the
/// end if anything was rescanned.
pub fn load_report(
    config: &ScanConfig,
    project: Option<&Path>,
    progress: &dyn ProgressSink,
) -> Result<UsageReport> {
    let cache_path = config.cache_path();
    let mut cache = UsageCache::load(&cache_path);

    let mut permissions = load_permission_stats(&config.projects_dir(), &mut cache, progress)?;

    progress.notify("Loading user settings...");
    let user_allowed = load_user_permissions(config).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Ignoring unreadable user settings");
        Vec::new()
    });
    let project_allowed = match project {
        Some(project) => load_project_permissions(config, project).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring unreadable project settings");
            Vec::new()
        }),
        None => Vec::new(),
    };
    apply_approval_levels(&mut permissions, &user_allowed, &project_allowed);

    progress.notify("Grouping permissions...");
    let groups = group_permissions(&permissions);

    let agents = load_agent_usage(&config.projects_dir(), &mut cache, progress)?;

    if cache.is_dirty() {
        cache.save(&cache_path)?;
    }

    Ok(UsageReport {
        permissions,
        groups,
        agents,
    })
}
