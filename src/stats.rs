//! Aggregated usage statistics types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signature::PermissionSignature;

/// Where a permission is already approved.
///
/// Ordinal: `NotApproved < Project < User`, so `max` picks the widest
/// approval across a group.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalLevel {
    #[default]
    NotApproved,
    Project,
    User,
}

impl std::fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("\u{2713} user"),
            Self::Project => f.write_str("\u{2713} proj"),
            Self::NotApproved => f.write_str("\u{25cb}"),
        }
    }
}

/// Usage statistics for one permission signature.
///
/// `approved + denied <= count`: invocations whose result never made it
/// into the log (truncated files, mid-write tails) stay unclassified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStats {
    pub signature: PermissionSignature,
    pub count: u64,
    /// Results recorded without the error flag.
    #[serde(default)]
    pub approved: u64,
    /// Results the user explicitly rejected.
    #[serde(default)]
    pub denied: u64,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Decoded project paths that referenced this permission.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub projects: BTreeSet<String>,
    #[serde(default, skip_serializing)]
    pub approved_at: ApprovalLevel,
}

impl PermissionStats {
    pub fn new(signature: PermissionSignature) -> Self {
        Self {
            signature,
            count: 0,
            approved: 0,
            denied: 0,
            last_seen: None,
            projects: BTreeSet::new(),
            approved_at: ApprovalLevel::NotApproved,
        }
    }

    /// Fold another stats entry for the same signature into this one:
    /// counts add, last-seen takes the max.
    pub fn absorb(&mut self, other: &PermissionStats) {
        self.count += other.count;
        self.approved += other.approved;
        self.denied += other.denied;
        self.bump_last_seen(other.last_seen);
    }

    /// Advance `last_seen` if `at` is more recent.
    pub fn bump_last_seen(&mut self, at: Option<DateTime<Utc>>) {
        if let Some(at) = at
            && self.last_seen.is_none_or(|seen| at > seen)
        {
            self.last_seen = Some(at);
        }
    }
}

/// A permission family with its per-scope children.
///
/// Totals are exact sums over `children`; `last_seen` and `approved_at`
/// are maxima.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGroup {
    pub family: String,
    pub total_count: u64,
    pub total_approved: u64,
    pub total_denied: u64,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Children sorted descending by invocation count.
    pub children: Vec<PermissionStats>,
    #[serde(default, skip_serializing)]
    pub approved_at: ApprovalLevel,
}

/// Permission usage attributed to one sub-agent type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUsageStats {
    /// Declared agent type, or `"Unknown"` when the launch event was
    /// never correlated.
    pub agent_type: String,
    /// Signatures this agent invoked, sorted descending by count.
    pub permissions: Vec<PermissionStats>,
    pub total_calls: u64,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Number of distinct agent log files this type appeared in.
    pub sessions: usize,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub projects: BTreeSet<String>,
}
