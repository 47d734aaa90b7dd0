//! Collapsing flat permission stats into per-family groups.

use std::collections::HashMap;

use crate::stats::{PermissionGroup, PermissionStats};

/// Partition flat stats by permission family.
///
/// Children keep their full stats, sorted descending by count; group
/// totals are exact sums over children and the group list itself is
/// sorted descending by total count. Total function: empty in, empty out.
pub fn group_permissions(stats: &[PermissionStats]) -> Vec<PermissionGroup> {
    let mut groups: HashMap<String, PermissionGroup> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for stat in stats {
        let family = &stat.signature.family;
        let group = groups.entry(family.clone()).or_insert_with(|| {
            order.push(family.clone());
            PermissionGroup {
                family: family.clone(),
                total_count: 0,
                total_approved: 0,
                total_denied: 0,
                last_seen: None,
                children: Vec::new(),
                approved_at: stat.approved_at,
            }
        });

        group.total_count += stat.count;
        group.total_approved += stat.approved;
        group.total_denied += stat.denied;
        if let Some(at) = stat.last_seen
            && group.last_seen.is_none_or(|seen| at > seen)
        {
            group.last_seen = Some(at);
        }
        group.approved_at = group.approved_at.max(stat.approved_at);
        group.children.push(stat.clone());
    }

    let mut result: Vec<PermissionGroup> = order
        .into_iter()
        .filter_map(|family| groups.remove(&family))
        .collect();

    for group in &mut result {
        group.children.sort_by(|a, b| b.count.cmp(&a.count));
    }
    result.sort_by(|a, b| b.total_count.cmp(&a.total_count));

    result
}
