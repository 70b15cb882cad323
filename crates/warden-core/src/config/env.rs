use std::path::PathBuf;

use warden_tools::UnlistedPolicy;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WARDEN_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.tools.enabled = enabled;
        }
        if let Ok(v) = std::env::var("WARDEN_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("WARDEN_SHELL_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.tools.shell.timeout = secs;
        }
        if let Ok(v) = std::env::var("WARDEN_PROJECT_ROOT") {
            self.tools.shell.project_root = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Ok(v) = std::env::var("WARDEN_UNLISTED_POLICY") {
            match v.trim().to_ascii_lowercase().as_str() {
                "require_approval" => {
                    self.tools.shell.unlisted_policy = UnlistedPolicy::RequireApproval;
                }
                "block" => self.tools.shell.unlisted_policy = UnlistedPolicy::Block,
                _ => tracing::warn!("ignoring invalid WARDEN_UNLISTED_POLICY value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("WARDEN_MAX_READ_BYTES")
            && let Ok(bytes) = v.parse::<u64>()
        {
            self.tools.limits.max_read_bytes = bytes;
        }
        if let Ok(v) = std::env::var("WARDEN_MAX_FETCH_BYTES")
            && let Ok(bytes) = v.parse::<u64>()
        {
            self.tools.limits.max_fetch_bytes = bytes;
        }
        if let Ok(v) = std::env::var("WARDEN_MAX_SEARCH_RESULTS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.tools.limits.max_search_results = n;
        }
    }
}
