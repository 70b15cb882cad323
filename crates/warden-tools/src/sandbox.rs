//! Shell command classifier.
//!
//! [`CommandSandbox::validate`] is a pure function of the command string and the sandbox
//! configuration. It never spawns anything and holds no mutable state, so one instance can be
//! shared across every in-flight tool call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};

use crate::config::{ShellConfig, UnlistedPolicy};
use crate::path_guard::resolve_path;

/// Base commands that run without mandatory approval unless they carry a dangerous flag.
pub const DEFAULT_ALLOWED: &[&str] = &[
    "awk", "basename", "cargo", "cat", "chmod", "cp", "cut", "date", "df", "diff", "dirname",
    "du", "echo", "false", "fd", "file", "find", "git", "go", "grep", "head", "jq", "ls", "make",
    "mkdir", "mv", "node", "npm", "printf", "pwd", "python", "python3", "realpath", "rg", "rm",
    "rustc", "rustfmt", "sed", "sleep", "sort", "stat", "tail", "test", "touch", "tr", "tree",
    "true", "uname", "uniq", "wc", "which", "whoami",
];

/// Patterns that deny a command outright. Entries with regex syntax also match as regexes.
pub const DEFAULT_BLOCKED: &[&str] = &[
    r"rm\s+-[a-z]*(rf|fr)[a-z]*\s+(/|~)(\s|\*|$)",
    "--no-preserve-root",
    r"\bsudo\b",
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\s+if=",
    r"\b(shutdown|reboot|halt|poweroff)\b",
    ":(){ :|:& };:",
    r">\s*/dev/(sd|hd|nvme|disk)",
    r"\bchmod\s+(-r\s+)?777\s+/(\s|$)",
    r"\b(curl|wget)\b[^|]*\|\s*(ba|z|da)?sh\b",
    r"^\s*eval\b",
];

/// Verdict for a full command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandDecision {
    Allowed,
    RequiresApproval,
    Blocked { reason: String },
}

impl CommandDecision {
    fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
struct BlockPattern {
    source: String,
    literal: String,
    regex: Option<Regex>,
}

impl BlockPattern {
    fn new(source: &str) -> Self {
        let regex = if has_regex_syntax(source) {
            match RegexBuilder::new(source).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::debug!(pattern = source, "block pattern used as literal only: {e}");
                    None
                }
            }
        } else {
            None
        };
        Self {
            source: source.to_owned(),
            literal: source.to_lowercase(),
            regex,
        }
    }

    fn matches(&self, raw: &str, lowered: &str) -> bool {
        lowered.contains(&self.literal) || self.regex.as_ref().is_some_and(|re| re.is_match(raw))
    }
}

fn has_regex_syntax(pattern: &str) -> bool {
    pattern.contains([
        '\\', '[', ']', '*', '+', '?', '(', ')', '{', '}', '^', '$', '|',
    ])
}

/// Classifies shell command lines as allowed, needing approval, or blocked.
#[derive(Debug)]
pub struct CommandSandbox {
    allowed: HashSet<String>,
    blocked: Vec<BlockPattern>,
    project_root: Option<PathBuf>,
    unlisted_policy: UnlistedPolicy,
    restrict_working_directory: bool,
}

impl CommandSandbox {
    #[must_use]
    pub fn new(config: &ShellConfig) -> Self {
        let allowed = DEFAULT_ALLOWED
            .iter()
            .map(|s| (*s).to_owned())
            .chain(config.allowed_commands.iter().map(|s| s.trim().to_lowercase()))
            .filter(|s| !s.is_empty())
            .collect();

        let mut sources: Vec<String> = DEFAULT_BLOCKED.iter().map(|s| (*s).to_owned()).collect();
        for pattern in &config.blocked_patterns {
            if !pattern.is_empty() && !sources.contains(pattern) {
                sources.push(pattern.clone());
            }
        }

        Self {
            allowed,
            blocked: sources.iter().map(|s| BlockPattern::new(s)).collect(),
            project_root: config.project_root.clone(),
            unlisted_policy: config.unlisted_policy,
            restrict_working_directory: config.restrict_working_directory,
        }
    }

    #[must_use]
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Classify a full command line.
    ///
    /// Substitution and block-pattern checks run on the raw string before it is split, so a
    /// sub-command smuggled inside `$(...)` never reaches the per-component checks.
    #[must_use]
    pub fn validate(&self, command: &str) -> CommandDecision {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return CommandDecision::blocked("empty command");
        }

        if let Some(kind) = find_substitution(trimmed) {
            tracing::debug!(command = trimmed, kind, "shell substitution detected");
            return CommandDecision::blocked(kind);
        }

        if let Some(pattern) = self.find_blocked_pattern(trimmed) {
            return CommandDecision::blocked(format!("blocked pattern: {pattern}"));
        }

        let components = split_components(trimmed);
        if components.is_empty() {
            return CommandDecision::blocked("no command to run");
        }

        let mut needs_approval = false;
        for component in &components {
            match self.classify_component(component) {
                CommandDecision::Allowed => {}
                CommandDecision::RequiresApproval => needs_approval = true,
                blocked @ CommandDecision::Blocked { .. } => return blocked,
            }
        }

        if needs_approval {
            CommandDecision::RequiresApproval
        } else {
            CommandDecision::Allowed
        }
    }

    /// Whether a command may run with `path` as its working directory.
    #[must_use]
    pub fn is_working_directory_allowed(&self, path: &Path) -> bool {
        let Some(root) = self.project_root.as_deref() else {
            return true;
        };
        if !self.restrict_working_directory {
            return true;
        }
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        resolve_path(&candidate).starts_with(resolve_path(root))
    }

    fn find_blocked_pattern(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.blocked
            .iter()
            .find(|p| p.matches(text, &lowered))
            .map(|p| p.source.as_str())
    }

    fn classify_component(&self, component: &str) -> CommandDecision {
        if let Some(pattern) = self.find_blocked_pattern(component) {
            return CommandDecision::blocked(format!("blocked pattern: {pattern}"));
        }

        let Some(base) = base_command(component) else {
            // Bare `KEY=value` assignments run nothing.
            return CommandDecision::Allowed;
        };

        if !self.allowed.contains(&base) {
            return match self.unlisted_policy {
                UnlistedPolicy::RequireApproval => CommandDecision::RequiresApproval,
                UnlistedPolicy::Block => {
                    CommandDecision::blocked(format!("command not allow-listed: {base}"))
                }
            };
        }

        let args: Vec<&str> = skip_env_assignments(component)
            .split_whitespace()
            .skip(1)
            .map(strip_wrapping_quotes)
            .collect();
        if let Some(flag) = dangerous_flag(&base, &args) {
            tracing::debug!(component, flag, "allow-listed command escalated");
            return CommandDecision::RequiresApproval;
        }

        CommandDecision::Allowed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    None,
    Single,
    Double,
}

/// Find command or process substitution outside single-quoted spans.
///
/// Backslashes keep quotes from toggling but never hide a substitution token.
#[must_use]
pub fn find_substitution(command: &str) -> Option<&'static str> {
    let mut quote = QuoteState::None;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        if quote == QuoteState::Single {
            if ch == '\'' {
                quote = QuoteState::None;
            }
            continue;
        }

        let next = chars.peek().copied();
        match (ch, next) {
            ('`', _) => return Some("backtick command substitution"),
            ('$', Some('(')) => return Some("$(...) command substitution"),
            ('<' | '>', Some('(')) => return Some("process substitution"),
            _ => {}
        }

        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\'' if quote == QuoteState::None => quote = QuoteState::Single,
            '"' if quote == QuoteState::None => quote = QuoteState::Double,
            '"' => quote = QuoteState::None,
            _ => {}
        }
    }
    None
}

/// Split a command line into pipeline components.
///
/// Separators are `;`, newline, `&&`, `||`, `|`, `|&`, and a lone `&`. Nothing inside single or
/// double quotes splits, escaped characters are copied literally, and the `>&`, `<&`, `&>`
/// redirections are kept intact. Components are trimmed; empty ones are dropped.
#[must_use]
pub fn split_components(command: &str) -> Vec<String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut quote = QuoteState::None;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    let flush = |components: &mut Vec<String>, current: &mut String| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            components.push(trimmed.to_owned());
        }
        current.clear();
    };

    while let Some(ch) = chars.next() {
        if escaped {
            escaped = false;
            current.push(ch);
            continue;
        }
        match quote {
            QuoteState::Single => {
                if ch == '\'' {
                    quote = QuoteState::None;
                }
                current.push(ch);
            }
            QuoteState::Double => {
                match ch {
                    '\\' => escaped = true,
                    '"' => quote = QuoteState::None,
                    _ => {}
                }
                current.push(ch);
            }
            QuoteState::None => match ch {
                '\\' => {
                    escaped = true;
                    current.push(ch);
                }
                '\'' => {
                    quote = QuoteState::Single;
                    current.push(ch);
                }
                '"' => {
                    quote = QuoteState::Double;
                    current.push(ch);
                }
                ';' | '\n' => flush(&mut components, &mut current),
                '|' => {
                    let _ = chars.next_if(|c| *c == '|' || *c == '&');
                    flush(&mut components, &mut current);
                }
                '&' => {
                    if chars.next_if_eq(&'&').is_some() {
                        flush(&mut components, &mut current);
                    } else if current.ends_with(['>', '<']) || chars.peek() == Some(&'>') {
                        current.push(ch);
                    } else {
                        flush(&mut components, &mut current);
                    }
                }
                _ => current.push(ch),
            },
        }
    }
    flush(&mut components, &mut current);

    components
}

/// Base command name of one component: env assignments skipped, path stripped, lowercased.
#[must_use]
pub fn base_command(component: &str) -> Option<String> {
    let token = skip_env_assignments(component).split_whitespace().next()?;
    let token = strip_wrapping_quotes(token);
    let base = token.rsplit(['/', '\\']).next().unwrap_or(token);
    if base.is_empty() {
        None
    } else {
        Some(base.to_lowercase())
    }
}

/// Skip leading `KEY=value` assignments (e.g. `RUST_LOG=debug cargo run`).
fn skip_env_assignments(s: &str) -> &str {
    let mut rest = s.trim_start();
    loop {
        let Some(word) = rest.split_whitespace().next() else {
            return rest;
        };
        let is_assignment = word.split_once('=').is_some_and(|(name, _)| {
            !name.is_empty()
                && name
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
        if !is_assignment {
            return rest;
        }
        rest = rest[word.len()..].trim_start();
    }
}

fn strip_wrapping_quotes(token: &str) -> &str {
    token.trim_matches(|c| c == '"' || c == '\'')
}

fn is_short_flag_with(arg: &str, letters: &[char]) -> bool {
    arg.strip_prefix('-')
        .filter(|rest| !rest.starts_with('-'))
        .is_some_and(|rest| rest.chars().any(|c| letters.contains(&c)))
}

fn dangerous_flag(base: &str, args: &[&str]) -> Option<&'static str> {
    match base {
        "rm" => args
            .iter()
            .any(|a| is_short_flag_with(a, &['r', 'R', 'f']) || matches!(*a, "--recursive" | "--force"))
            .then_some("recursive or forced deletion"),
        "chmod" | "chown" | "chgrp" => Some("permission change"),
        "find" => args
            .iter()
            .any(|a| matches!(*a, "-delete" | "-exec" | "-execdir" | "-ok" | "-okdir"))
            .then_some("find with -delete/-exec"),
        "sed" => args
            .iter()
            .any(|a| is_short_flag_with(a, &['i']) || a.starts_with("--in-place"))
            .then_some("in-place edit"),
        "mv" | "cp" => args
            .iter()
            .any(|a| is_short_flag_with(a, &['f']) || *a == "--force")
            .then_some("forced overwrite"),
        "git" => git_danger(args),
        _ => None,
    }
}

/// Git global options whose value is the next argument.
const GIT_VALUE_OPTIONS: &[&str] = &[
    "-C",
    "-c",
    "--git-dir",
    "--work-tree",
    "--namespace",
    "--exec-path",
    "--super-prefix",
    "--config-env",
];

fn git_subcommand_pos(args: &[&str]) -> Option<usize> {
    let mut i = 0;
    while i < args.len() {
        let arg = args[i];
        if GIT_VALUE_OPTIONS.contains(&arg) {
            i += 2;
        } else if arg.starts_with('-') {
            i += 1;
        } else {
            return Some(i);
        }
    }
    None
}

fn git_danger(args: &[&str]) -> Option<&'static str> {
    let subcommand_pos = git_subcommand_pos(args)?;
    let sub = args[subcommand_pos];
    let rest = &args[subcommand_pos + 1..];
    match sub {
        "push" => rest
            .iter()
            .any(|a| {
                is_short_flag_with(a, &['f'])
                    || a.starts_with("--force")
                    || *a == "--delete"
                    || (a.starts_with('+') && a.len() > 1)
            })
            .then_some("force push"),
        "reset" => rest.contains(&"--hard").then_some("hard reset"),
        "clean" => rest
            .iter()
            .any(|a| is_short_flag_with(a, &['f']) || *a == "--force")
            .then_some("clean of untracked files"),
        "branch" => rest
            .iter()
            .any(|a| *a == "-D" || (a.starts_with('-') && !a.starts_with("--") && a.contains('D')))
            .then_some("forced branch deletion"),
        "checkout" | "restore" => rest
            .iter()
            .any(|a| matches!(*a, "--" | "." | "-f" | "--force"))
            .then_some("discarding working tree changes"),
        _ => None,
    }
}
