//! Contracts of the path and approval oracles, plus the session-scoped approval store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use glob::Pattern;
use serde::Deserialize;

/// How eagerly a tool action must be confirmed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Run without prompting.
    Automatic,
    /// Prompt the first time; remember the answer for the session.
    AskOnce,
    /// Prompt every time.
    AskAlways,
}

/// Kind of filesystem access being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathOperation {
    Read,
    Write,
}

/// Verdict of a [`PathOracle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathDecision {
    Allowed,
    RequiresApproval { reason: String },
    Denied { reason: String },
}

/// Decides whether a filesystem path lies inside the permitted boundary.
pub trait PathOracle: Send + Sync {
    fn validate(&self, path: &Path, operation: PathOperation) -> PathDecision;

    /// Resolve `path` to the location the tools should actually touch.
    fn canonicalize(&self, path: &Path) -> Option<PathBuf>;
}

/// Everything the human needs to decide on one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub description: String,
    pub details: String,
    pub diff_preview: Option<String>,
    pub conversation_id: String,
}

/// Human-in-the-loop approval workflow with session memory.
pub trait ApprovalOracle: Send + Sync {
    /// Resolve the effective level for `(tool, details)`; `default_level` applies when no
    /// rule or remembered decision says otherwise.
    fn check_permission(
        &self,
        tool: &str,
        details: &str,
        default_level: PermissionLevel,
    ) -> PermissionLevel;

    /// Ask the user. May stay pending for as long as the user takes to answer.
    fn request_approval(&self, request: ApprovalRequest) -> impl Future<Output = bool> + Send;

    /// Remember an approval for the rest of the session.
    fn record_session_approval(&self, tool: &str, details: &str);
}

/// The part of the approval workflow that talks to the user.
pub trait ApprovalPrompt: Send + Sync {
    fn prompt(&self, request: &ApprovalRequest) -> impl Future<Output = bool> + Send;
}

/// Session-scoped approvals keyed by tool name and operation details.
///
/// Cloning shares the underlying store; [`SessionApprovals::new`] starts an empty session.
#[derive(Debug, Clone, Default)]
pub struct SessionApprovals {
    approved: Arc<RwLock<HashSet<(String, String)>>>,
}

impl SessionApprovals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, tool: &str, details: &str) -> bool {
        self.approved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(tool.to_owned(), details.to_owned()))
    }

    pub fn record(&self, tool: &str, details: &str) {
        self.approved
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((tool.to_owned(), details.to_owned()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.approved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.approved
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Single permission rule: glob `pattern` over the operation details + level.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRule {
    pub pattern: String,
    pub level: PermissionLevel,
}

/// TOML-deserializable permissions section: tool name → ordered rules.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PermissionsConfig {
    #[serde(flatten)]
    pub tools: HashMap<String, Vec<PermissionRule>>,
}

/// Per-tool permission rules. First matching glob wins.
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    rules: HashMap<String, Vec<PermissionRule>>,
}

impl PermissionPolicy {
    #[must_use]
    pub fn new(rules: HashMap<String, Vec<PermissionRule>>) -> Self {
        Self { rules }
    }

    /// Level of the first rule whose glob matches `details` (case-insensitive).
    #[must_use]
    pub fn check(&self, tool: &str, details: &str) -> Option<PermissionLevel> {
        let rules = self.rules.get(tool)?;
        let normalized = details.to_lowercase();
        rules.iter().find_map(|rule| {
            Pattern::new(&rule.pattern.to_lowercase())
                .ok()
                .filter(|pat| pat.matches(&normalized))
                .map(|_| rule.level)
        })
    }
}

impl From<PermissionsConfig> for PermissionPolicy {
    fn from(config: PermissionsConfig) -> Self {
        Self::new(config.tools)
    }
}

/// Default [`ApprovalOracle`]: configured rules, then remembered approvals, then the prompt.
#[derive(Debug)]
pub struct SessionApprovalOracle<H: ApprovalPrompt> {
    prompt: H,
    session: SessionApprovals,
    policy: PermissionPolicy,
}

impl<H: ApprovalPrompt> SessionApprovalOracle<H> {
    #[must_use]
    pub fn new(prompt: H, session: SessionApprovals) -> Self {
        Self {
            prompt,
            session,
            policy: PermissionPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PermissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn session(&self) -> &SessionApprovals {
        &self.session
    }
}

impl<H: ApprovalPrompt> ApprovalOracle for SessionApprovalOracle<H> {
    fn check_permission(
        &self,
        tool: &str,
        details: &str,
        default_level: PermissionLevel,
    ) -> PermissionLevel {
        let level = self.policy.check(tool, details).unwrap_or(default_level);
        if level == PermissionLevel::AskOnce && self.session.contains(tool, details) {
            return PermissionLevel::Automatic;
        }
        level
    }

    async fn request_approval(&self, request: ApprovalRequest) -> bool {
        tracing::debug!(
            tool = %request.tool_name,
            conversation = %request.conversation_id,
            "requesting approval"
        );
        self.prompt.prompt(&request).await
    }

    fn record_session_approval(&self, tool: &str, details: &str) {
        self.session.record(tool, details);
    }
}
