//! # claude-perms
//!
//! Permission usage analytics for Claude Code session logs.
//!
//! This crate scans the JSONL session transcripts Claude Code writes under
//! `~/.claude/projects/`, correlates each tool invocation with its eventual
//! result (approved, user-rejected, or failed), and aggregates the counts
//! into per-permission and per-agent-type statistics. Repeated scans are
//! incremental: per-file results are cached keyed by a metadata fingerprint,
//! so only changed files are re-parsed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use claude_perms::{NoopProgress, ScanConfig, load_report};
//!
//! fn main() -> Result<(), claude_perms::Error> {
//!     let config = ScanConfig::default();
//!     let report = load_report(&config, None, &NoopProgress)?;
//!     for group in &report.groups {
//!         println!("{}: {} calls", group.family, group.total_count);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming progress
//!
//! ```rust,no_run
//! use claude_perms::{ScanConfig, load_report};
//!
//! let (tx, rx) = std::sync::mpsc::channel::<String>();
//! std::thread::spawn(move || {
//!     for message in rx {
//!         eprintln!("scanning: {message}");
//!     }
//! });
//! let report = load_report(&ScanConfig::default(), None, &tx)?;
//! # Ok::<(), claude_perms::Error>(())
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

pub mod aggregate;
pub mod agents;
pub mod cache;
pub mod config;
pub mod declarations;
pub mod grouping;
pub mod prelude;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod settings;
pub mod signature;
pub mod stats;

// Re-exports for convenience
pub use aggregate::{decode_project_path, load_permission_stats};
pub use agents::load_agent_usage;
pub use cache::{Fingerprint, UsageCache, CACHE_VERSION};
pub use config::{ScanConfig, ScanConfigBuilder};
pub use declarations::{Declaration, load_agent_declarations, load_skill_declarations};
pub use grouping::group_permissions;
pub use progress::{NoopProgress, ProgressSink};
pub use report::{UsageReport, load_report};
pub use scanner::scan_session_log;
pub use settings::{
    ApplyResult, DiffLine, DiffStatus, Settings, apply_approval_levels, approval_level,
    load_project_permissions, load_user_permissions, preview_diff, write_permission,
    write_project_permission, write_user_permission,
};
pub use signature::{PermissionSignature, derive_signature, matches_approval_pattern};
pub use stats::{AgentUsageStats, ApprovalLevel, PermissionGroup, PermissionStats};

/// Error type for claude-perms operations.
///
/// Only failures of the run as a whole surface here. Per-unit failures
/// (a malformed log line, an unreadable project directory, a stale cache)
/// are recovered locally by skipping the offending unit.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to parse a document or timestamp.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
