//! Shell-command sandbox and tool-execution mediator for AI agents.
//!
//! [`CommandSandbox`] classifies command lines, [`ToolService`] executes the built-in tools
//! behind path and approval oracles, and [`ToolRouter`] turns a model's tool call into a
//! string it can act on.

pub mod approval;
pub mod audit;
pub mod config;
pub mod error;
pub mod fetch;
pub mod file;
pub mod html;
pub mod output;
pub mod params;
pub mod path_guard;
pub mod permissions;
pub mod registry;
pub mod router;
pub mod sandbox;
pub mod service;
mod shell;

pub use approval::{ApprovalGate, FixedPrompt, PendingApproval};
pub use audit::{AuditEntry, AuditLogger, AuditResult};
pub use config::{AuditConfig, FetchConfig, LimitsConfig, ShellConfig, ToolsConfig, UnlistedPolicy};
pub use error::{ErrorClass, ToolError};
pub use output::{
    CommandResult, EditOutcome, FileEntry, MAX_TOOL_OUTPUT_CHARS, SearchResult, WriteOutcome,
    truncate_tool_output,
};
pub use params::{ArgError, ArgValue, ToolArgs};
pub use path_guard::ProjectPathOracle;
pub use permissions::{
    ApprovalOracle, ApprovalPrompt, ApprovalRequest, PathDecision, PathOperation, PathOracle,
    PermissionLevel, PermissionPolicy, PermissionRule, PermissionsConfig, SessionApprovalOracle,
    SessionApprovals,
};
pub use registry::{ToolDef, ToolRegistry, tool_definitions};
pub use router::ToolRouter;
pub use sandbox::{CommandDecision, CommandSandbox};
pub use service::ToolService;
