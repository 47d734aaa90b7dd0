//! Scan configuration: where the Claude data directory lives.

use std::path::{Path, PathBuf};

/// Locates the Claude data directory and the well-known files inside it.
///
/// Defaults to `~/.claude`; tests point it at a temp dir.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Base directory (default: `~/.claude`).
    pub base_dir: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_dir: directories::UserDirs::new()
                .map(|d| d.home_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude"),
        }
    }
}

impl ScanConfig {
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Per-project session log directories.
    pub fn projects_dir(&self) -> PathBuf {
        self.base_dir.join("projects")
    }

    /// On-disk scan cache.
    pub fn cache_path(&self) -> PathBuf {
        self.base_dir.join("perms-cache.json")
    }

    /// User-level settings file.
    pub fn user_settings_path(&self) -> PathBuf {
        self.base_dir.join("settings.local.json")
    }

    /// Project-level settings file.
    pub fn project_settings_path(&self, project: &Path) -> PathBuf {
        project.join(".claude").join("settings.local.json")
    }

    /// User-level agent definitions.
    pub fn agents_dir(&self) -> PathBuf {
        self.base_dir.join("agents")
    }

    /// Installed plugin cache (`cache/<marketplace>/<plugin>/<version>/`).
    pub fn plugins_cache_dir(&self) -> PathBuf {
        self.base_dir.join("plugins").join("cache")
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    base_dir: Option<PathBuf>,
}

impl ScanConfigBuilder {
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn build(self) -> ScanConfig {
        ScanConfig {
            base_dir: self.base_dir.unwrap_or_else(|| ScanConfig::default().base_dir),
        }
    }
}
