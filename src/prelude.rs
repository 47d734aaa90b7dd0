//! Prelude module for convenient imports.
//!
//! Re-exports the types most consumers of the analysis pipeline need.
//!
//! # Usage
//!
//! ```rust
//! use claude_perms::prelude::*;
//! ```

// Core pipeline
pub use crate::Error;
pub use crate::Result;
pub use crate::aggregate::load_permission_stats;
pub use crate::agents::load_agent_usage;
pub use crate::grouping::group_permissions;
pub use crate::report::{UsageReport, load_report};

// Configuration
pub use crate::config::{ScanConfig, ScanConfigBuilder};

// Cache
pub use crate::cache::{Fingerprint, UsageCache};

// Data model
pub use crate::signature::PermissionSignature;
pub use crate::stats::{AgentUsageStats, ApprovalLevel, PermissionGroup, PermissionStats};

// Progress
pub use crate::progress::{NoopProgress, ProgressSink};

// Settings
pub use crate::settings::{ApplyResult, DiffLine, DiffStatus, Settings};
