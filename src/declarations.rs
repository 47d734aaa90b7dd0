//! Declared-permission scanning of agent and skill definition files.
//!
//! Agents and skills declare the tools they intend to use in the YAML
//! frontmatter of their markdown definitions. These declarations come from
//! the definition files themselves, not the usage logs, so they complement
//! the observed statistics: a declared-but-never-used permission shows up
//! here and nowhere else.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ScanConfig;
use crate::signature::PermissionSignature;
use crate::{Error, Result};

/// Permissions declared by one agent or skill definition file.
#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    pub name: String,
    /// Owning plugin, empty for user-level definitions.
    pub plugin: String,
    /// Plugin version (e.g. `1.0.20`), empty when versionless.
    pub version: String,
    pub file_path: PathBuf,
    pub permissions: Vec<PermissionSignature>,
}

#[derive(Debug, Deserialize)]
struct DeclarationFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
    #[serde(default)]
    tools: Option<ToolsField>,
}

/// The `tools` field appears both as a comma-separated string and as a
/// YAML list in the wild.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolsField {
    List(Vec<String>),
    Csv(String),
}

impl ToolsField {
    fn into_tools(self) -> Vec<String> {
        match self {
            Self::List(items) => items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Self::Csv(s) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Agent declarations from the user agents dir and every installed plugin
/// version. Unreadable sources contribute nothing.
pub fn load_agent_declarations(config: &ScanConfig) -> Vec<Declaration> {
    let mut agents = load_from_dir(&config.agents_dir(), "", "");

    for (plugin, version, plugin_dir) in plugin_versions(&config.plugins_cache_dir()) {
        agents.extend(load_from_dir(&plugin_dir.join("agents"), &plugin, &version));
    }

    agents
}

/// Skill declarations from installed plugins. Each skill lives in its own
/// subdirectory as `SKILL.md`; only a plugin's latest version counts.
pub fn load_skill_declarations(config: &ScanConfig) -> Vec<Declaration> {
    let mut skills = Vec::new();

    for (plugin, version, plugin_dir) in latest_plugin_versions(&config.plugins_cache_dir()) {
        let skills_dir = plugin_dir.join("skills");
        let Ok(entries) = std::fs::read_dir(&skills_dir) else {
            continue;
        };

        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let skill_path = entry.path().join("SKILL.md");
            if let Some(decl) = parse_declaration_file(&skill_path, &plugin, &version)
                && !decl.permissions.is_empty()
            {
                skills.push(decl);
            }
        }
    }

    skills
}

/// All markdown definitions in one directory that declare tools.
fn load_from_dir(dir: &Path, plugin: &str, version: &str) -> Vec<Declaration> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut declarations = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if let Some(decl) = parse_declaration_file(&path, plugin, version)
            && !decl.permissions.is_empty()
        {
            declarations.push(decl);
        }
    }
    declarations
}

/// Every `<marketplace>/<plugin>/<version>` directory under the plugin
/// cache.
fn plugin_versions(cache_dir: &Path) -> Vec<(String, String, PathBuf)> {
    let mut versions = Vec::new();

    for marketplace in subdirs(cache_dir) {
        for plugin in subdirs(&marketplace) {
            let plugin_name = dir_name(&plugin);
            for version_dir in subdirs(&plugin) {
                versions.push((plugin_name.clone(), dir_name(&version_dir), version_dir));
            }
        }
    }

    versions
}

/// Like [`plugin_versions`] but keeping only each plugin's latest version
/// (highest version-directory name).
fn latest_plugin_versions(cache_dir: &Path) -> Vec<(String, String, PathBuf)> {
    let mut latest = Vec::new();

    for marketplace in subdirs(cache_dir) {
        for plugin in subdirs(&marketplace) {
            if let Some(version_dir) = subdirs(&plugin).into_iter().max_by_key(|d| dir_name(d)) {
                latest.push((dir_name(&plugin), dir_name(&version_dir), version_dir));
            }
        }
    }

    latest
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect()
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse one definition file. Unreadable or frontmatter-less files yield
/// nothing.
fn parse_declaration_file(path: &Path, plugin: &str, version: &str) -> Option<Declaration> {
    let content = std::fs::read_to_string(path).ok()?;
    let frontmatter = match parse_frontmatter(&content) {
        Ok(fm) => fm,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Skipping definition with bad frontmatter");
            return None;
        }
    };

    // Fall back to the file (or skill directory) name
    let name = frontmatter.name.unwrap_or_else(|| default_name(path));
    let tools = frontmatter.tools.map(ToolsField::into_tools).unwrap_or_default();

    Some(Declaration {
        name,
        plugin: plugin.to_string(),
        version: version.to_string(),
        file_path: path.to_path_buf(),
        permissions: PermissionSignature::parse_all(&tools),
    })
}

fn default_name(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem == "SKILL" {
        // skills are named by their directory, the file is always SKILL.md
        path.parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        stem.to_string()
    }
}

/// Extract and deserialize the YAML frontmatter between `---` fences.
fn parse_frontmatter(content: &str) -> Result<DeclarationFrontmatter> {
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| Error::Config("definition has no frontmatter".to_string()))?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| Error::Config("frontmatter not terminated".to_string()))?;

    serde_yaml_bw::from_str(rest[..end].trim())
        .map_err(|e| Error::Config(format!("frontmatter: {e}")))
}
