use std::path::PathBuf;

use serde::Deserialize;

use crate::permissions::{PermissionLevel, PermissionsConfig};

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_search_results() -> usize {
    100
}

fn default_ask_once() -> PermissionLevel {
    PermissionLevel::AskOnce
}

fn default_automatic() -> PermissionLevel {
    PermissionLevel::Automatic
}

fn default_user_agent() -> String {
    format!("warden/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    5
}

fn default_audit_destination() -> String {
    "stdout".into()
}

/// Top-level configuration for tool execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shell: ShellConfig::default(),
            limits: LimitsConfig::default(),
            fetch: FetchConfig::default(),
            audit: AuditConfig::default(),
            permissions: PermissionsConfig::default(),
        }
    }
}

/// What the sandbox does with a command whose base name is not allow-listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlistedPolicy {
    /// Route the command to the human for approval.
    #[default]
    RequireApproval,
    /// Refuse the command outright.
    Block,
}

/// Shell sandbox configuration: allow-list, block patterns, project boundary, timeout.
///
/// `allowed_commands` and `blocked_patterns` extend the built-in defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    #[serde(default)]
    pub unlisted_policy: UnlistedPolicy,
    #[serde(default = "default_true")]
    pub restrict_working_directory: bool,
    /// Default approval level for commands the sandbox classifies as allowed.
    #[serde(default = "default_ask_once")]
    pub allowed_command_level: PermissionLevel,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            allowed_commands: Vec::new(),
            blocked_patterns: Vec::new(),
            project_root: None,
            unlisted_policy: UnlistedPolicy::default(),
            restrict_working_directory: true,
            allowed_command_level: default_ask_once(),
        }
    }
}

/// Size and count ceilings shared by the file and fetch tools.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_bytes")]
    pub max_read_bytes: u64,
    #[serde(default = "default_max_bytes")]
    pub max_fetch_bytes: u64,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: default_max_bytes(),
            max_fetch_bytes: default_max_bytes(),
            max_search_results: default_max_search_results(),
        }
    }
}

/// Configuration for the web fetch tool.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_automatic")]
    pub permission_level: PermissionLevel,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            permission_level: default_automatic(),
        }
    }
}

/// Audit log of tool outcomes: `"stdout"` routes through tracing, anything else is a file path.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_audit_destination")]
    pub destination: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: default_audit_destination(),
        }
    }
}
