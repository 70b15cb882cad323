mod env;


use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use warden_tools::ToolsConfig;

fn default_log_level() -> String {
    "info".into()
}

/// Top-level configuration: logging plus the tool sections (`[shell]`, `[limits]`, `[fetch]`,
/// `[audit]`, `[permissions]`) at the root of the file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(flatten)]
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tools: ToolsConfig::default(),
        }
    }
}

/// A configuration that parsed but cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("project root {} is not a directory", path.display())]
    ProjectRootNotDirectory { path: PathBuf },

    #[error("invalid permission pattern `{pattern}` for {tool}: {reason}")]
    PermissionPattern {
        tool: String,
        pattern: String,
        reason: String,
    },
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the mediator cannot run with.
    ///
    /// Block patterns are not checked here: one that fails to compile as a regex still
    /// matches as a literal.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tools = &self.tools;
        let zero_checks: [(&'static str, bool); 5] = [
            ("shell.timeout", tools.shell.timeout == 0),
            ("fetch.timeout", tools.fetch.timeout == 0),
            ("limits.max_read_bytes", tools.limits.max_read_bytes == 0),
            ("limits.max_fetch_bytes", tools.limits.max_fetch_bytes == 0),
            ("limits.max_search_results", tools.limits.max_search_results == 0),
        ];
        if let Some((field, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Zero { field });
        }

        if let Some(root) = &tools.shell.project_root
            && !root.is_dir()
        {
            return Err(ConfigError::ProjectRootNotDirectory { path: root.clone() });
        }

        for (tool, rules) in &tools.permissions.tools {
            for rule in rules {
                if let Err(e) = glob::Pattern::new(&rule.pattern) {
                    return Err(ConfigError::PermissionPattern {
                        tool: tool.clone(),
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
