use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use warden_tools::permissions::{
    ApprovalOracle, ApprovalRequest, PathDecision, PathOperation, PathOracle, PermissionLevel,
    SessionApprovals,
};
use warden_tools::{
    ApprovalGate, EditOutcome, ProjectPathOracle, SessionApprovalOracle, ToolArgs, ToolError,
    ToolRouter, ToolService, ToolsConfig,
};

// -- Mock path oracle --

/// Returns the same decision for every path; relative paths resolve against `base`.
#[derive(Clone)]
struct FixedPathOracle {
    decision: PathDecision,
    base: PathBuf,
}

impl FixedPathOracle {
    fn new(base: &Path, decision: PathDecision) -> Self {
        Self {
            decision,
            base: base.to_path_buf(),
        }
    }
}

impl PathOracle for FixedPathOracle {
    fn validate(&self, _path: &Path, _operation: PathOperation) -> PathDecision {
        self.decision.clone()
    }

    fn canonicalize(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.base.join(path))
        }
    }
}

// -- Mock approval oracle --

/// Answers every prompt with `answer` and records what it was asked.
#[derive(Clone)]
struct RecordingApprover {
    answer: bool,
    requests: Arc<Mutex<Vec<ApprovalRequest>>>,
    session: SessionApprovals,
}

impl RecordingApprover {
    fn approving() -> Self {
        Self::answering(true)
    }

    fn denying() -> Self {
        Self::answering(false)
    }

    fn answering(answer: bool) -> Self {
        Self {
            answer,
            requests: Arc::new(Mutex::new(Vec::new())),
            session: SessionApprovals::new(),
        }
    }

    fn prompts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> Option<ApprovalRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl ApprovalOracle for RecordingApprover {
    fn check_permission(
        &self,
        tool: &str,
        details: &str,
        default_level: PermissionLevel,
    ) -> PermissionLevel {
        if default_level == PermissionLevel::AskOnce && self.session.contains(tool, details) {
            PermissionLevel::Automatic
        } else {
            default_level
        }
    }

    async fn request_approval(&self, request: ApprovalRequest) -> bool {
        self.requests.lock().unwrap().push(request);
        self.answer
    }

    fn record_session_approval(&self, tool: &str, details: &str) {
        self.session.record(tool, details);
    }
}

// -- Helpers --

fn config(root: &Path) -> ToolsConfig {
    let mut config = ToolsConfig::default();
    config.shell.project_root = Some(root.to_path_buf());
    config
}

fn project_service(
    root: &Path,
    approver: &RecordingApprover,
) -> ToolService<ProjectPathOracle, RecordingApprover> {
    ToolService::new(
        &config(root),
        ProjectPathOracle::new(root),
        approver.clone(),
    )
}

fn fixed_service(
    root: &Path,
    decision: PathDecision,
    approver: &RecordingApprover,
) -> ToolService<FixedPathOracle, RecordingApprover> {
    ToolService::new(
        &config(root),
        FixedPathOracle::new(root, decision),
        approver.clone(),
    )
}

// -- read_file --

#[tokio::test]
async fn read_allowed_path_without_prompt() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
    let approver = RecordingApprover::denying();
    let service = project_service(dir.path(), &approver);

    let text = service.read_file("notes.txt", "c1").await.unwrap();
    assert_eq!(text, "hello");
    assert_eq!(approver.prompts(), 0);
}

#[tokio::test]
async fn read_binary_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = b"GIF89a".to_vec();
    bytes.extend_from_slice(&[0, 1, 2, 3]);
    std::fs::write(dir.path().join("image.txt"), bytes).unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());

    let err = service.read_file("image.txt", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::BinaryFileUnsupported { .. }));
}

#[tokio::test]
async fn read_missing_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());
    let err = service.read_file("missing.txt", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::FileNotFound { .. }));
}

#[tokio::test]
async fn read_over_limit_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("big.log"), "x".repeat(64)).unwrap();
    let mut cfg = config(dir.path());
    cfg.limits.max_read_bytes = 16;
    let service = ToolService::new(
        &cfg,
        ProjectPathOracle::new(dir.path()),
        RecordingApprover::approving(),
    );

    let err = service.read_file("big.log", "c1").await.unwrap_err();
    assert!(matches!(
        err,
        ToolError::ResourceLimitExceeded {
            actual: 64,
            limit: 16,
            ..
        }
    ));
}

#[tokio::test]
async fn flagged_read_prompts_every_time() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    let approver = RecordingApprover::approving();
    let service = fixed_service(
        dir.path(),
        PathDecision::RequiresApproval {
            reason: "outside the project".into(),
        },
        &approver,
    );

    service.read_file("a.txt", "c1").await.unwrap();
    service.read_file("a.txt", "c1").await.unwrap();
    assert_eq!(approver.prompts(), 2);
    let request = approver.last_request().unwrap();
    assert_eq!(request.tool_name, "read_file");
    assert!(request.description.contains("outside the project"));
    assert_eq!(request.conversation_id, "c1");
}

#[tokio::test]
async fn declined_read_is_permission_denied() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    let service = fixed_service(
        dir.path(),
        PathDecision::RequiresApproval {
            reason: "outside".into(),
        },
        &RecordingApprover::denying(),
    );

    let err = service.read_file("a.txt", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::PermissionDenied { .. }));
}

#[tokio::test]
async fn empty_path_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());
    let err = service.read_file("  ", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidPath { .. }));
}

// -- write_file --

#[tokio::test]
async fn write_prompts_once_then_uses_session_approval() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let out = service
        .write_file("nested/deeper/out.txt", "first", "c1")
        .await
        .unwrap();
    assert_eq!(out.bytes_written, 5);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("nested/deeper/out.txt")).unwrap(),
        "first"
    );

    service
        .write_file("nested/deeper/out.txt", "second", "c1")
        .await
        .unwrap();
    assert_eq!(approver.prompts(), 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("nested/deeper/out.txt")).unwrap(),
        "second"
    );
}

#[tokio::test]
async fn write_over_existing_file_carries_diff() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    service
        .write_file("a.txt", "one\nthree\n", "c1")
        .await
        .unwrap();
    let diff = approver.last_request().unwrap().diff_preview.unwrap();
    assert!(diff.contains("- two"));
    assert!(diff.contains("+ three"));
}

#[tokio::test]
async fn declined_write_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let service = project_service(dir.path(), &RecordingApprover::denying());

    let err = service.write_file("out.txt", "data", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::PermissionDenied { .. }));
    assert!(!dir.path().join("out.txt").exists());
}

#[tokio::test]
async fn denied_write_never_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let target = outside.path().join("out.txt");
    let err = service
        .write_file(target.to_str().unwrap(), "data", "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::PermissionDenied { .. }));
    assert_eq!(approver.prompts(), 0);
    assert!(!target.exists());
}

#[tokio::test]
async fn flagged_write_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    service.write_file(".git/config", "[core]", "c1").await.unwrap();
    service.write_file(".git/config", "[core]", "c1").await.unwrap();
    assert_eq!(approver.prompts(), 2);
}

// -- edit_file --

#[tokio::test]
async fn identical_edit_is_noop_without_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("lib.rs");
    std::fs::write(&file, "fn a() {}\n").unwrap();
    let before = std::fs::metadata(&file).unwrap().modified().unwrap();
    let approver = RecordingApprover::denying();
    let service = project_service(dir.path(), &approver);

    let outcome = service
        .edit_file("lib.rs", "fn a()", "fn a()", "c1")
        .await
        .unwrap();
    assert!(matches!(outcome, EditOutcome::Unchanged { .. }));
    assert_eq!(approver.prompts(), 0);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "fn a() {}\n");
    assert_eq!(std::fs::metadata(&file).unwrap().modified().unwrap(), before);
}

#[tokio::test]
async fn two_occurrences_are_ambiguous() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.rs"), "let x = 1;\nlet x = 1;\n").unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let err = service
        .edit_file("lib.rs", "let x = 1;", "let x = 2;", "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::EditAmbiguous { match_count: 2, .. }));
    assert_eq!(approver.prompts(), 0);
}

#[tokio::test]
async fn missing_search_text_not_found() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.rs"), "fn main() {}\n").unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());

    let err = service
        .edit_file("lib.rs", "fn other()", "fn x()", "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::EditNotFound { .. }));
}

#[tokio::test]
async fn empty_search_text_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());
    let err = service.edit_file("lib.rs", "", "x", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::EmptySearchText));
}

#[tokio::test]
async fn edit_shows_diff_and_writes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("lib.rs");
    std::fs::write(&file, "fn main() {\n    old();\n}\n").unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let outcome = service
        .edit_file("lib.rs", "    old();", "    new();", "c1")
        .await
        .unwrap();
    let EditOutcome::Edited { bytes_written, .. } = outcome else {
        panic!("expected an edit");
    };
    let content = std::fs::read_to_string(&file).unwrap();
    assert_eq!(content, "fn main() {\n    new();\n}\n");
    assert_eq!(bytes_written, content.len());

    let request = approver.last_request().unwrap();
    assert_eq!(request.tool_name, "edit_file");
    let diff = request.diff_preview.unwrap();
    assert!(diff.contains("-     old();"));
    assert!(diff.contains("+     new();"));
}

#[tokio::test]
async fn declined_edit_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("lib.rs");
    std::fs::write(&file, "a b c").unwrap();
    let service = project_service(dir.path(), &RecordingApprover::denying());

    let err = service.edit_file("lib.rs", "b", "B", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::PermissionDenied { .. }));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "a b c");
}

// -- list_directory / search_files --

#[tokio::test]
async fn listing_is_sorted_and_hides_dotfiles() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["beta.txt", "Alpha.txt", ".env", "gamma"] {
        std::fs::write(dir.path().join(name), "x").unwrap();
    }
    std::fs::create_dir(dir.path().join("Delta")).unwrap();
    let service = project_service(dir.path(), &RecordingApprover::denying());

    let entries = service.list_directory(".", "c1").await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha.txt", "beta.txt", "Delta", "gamma"]);
    let delta = entries.iter().find(|e| e.name == "Delta").unwrap();
    assert!(delta.is_dir);
    assert!(delta.size.is_none());
}

#[tokio::test]
async fn listing_a_file_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "x").unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());
    let err = service.list_directory("a.txt", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidPath { .. }));
}

#[tokio::test]
async fn search_finds_matches() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/main.rs"), "fn main() {\n    run();\n}\n").unwrap();
    let service = project_service(dir.path(), &RecordingApprover::denying());

    let results = service.search_files(r"run\(\)", "src", "c1").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].line_number, 2);
    assert_eq!(results[0].match_start, 4);
}

#[tokio::test]
async fn invalid_regex_is_invalid_path() {
    let dir = tempfile::tempdir().unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());
    let err = service.search_files("(unclosed", ".", "c1").await.unwrap_err();
    let ToolError::InvalidPath { reason, .. } = err else {
        panic!("expected InvalidPath");
    };
    assert!(reason.contains("regex"));
}

// -- run_command --

#[cfg(unix)]
#[tokio::test]
async fn allowed_command_prompts_once_per_session() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let result = service.run_command("echo hello", None, "c1").await.unwrap();
    assert_eq!(result.stdout, "hello\n");
    service.run_command("echo hello", None, "c1").await.unwrap();
    assert_eq!(approver.prompts(), 1);

    service.run_command("echo other", None, "c1").await.unwrap();
    assert_eq!(approver.prompts(), 2);
}

#[tokio::test]
async fn unlisted_command_approval_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::denying();
    let service = project_service(dir.path(), &approver);

    for _ in 0..2 {
        let err = service
            .run_command("foobar123 --flag", None, "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }
    assert_eq!(approver.prompts(), 2);
    assert!(approver.session.is_empty());
}

#[tokio::test]
async fn blocked_command_never_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let err = service.run_command("rm -rf /", None, "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::SandboxBlocked { .. }));
    let err = service
        .run_command("echo $(cat /etc/passwd)", None, "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::SandboxBlocked { .. }));
    assert_eq!(approver.prompts(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn timed_out_command_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.shell.timeout = 1;
    cfg.shell.allowed_command_level = PermissionLevel::Automatic;
    let service = ToolService::new(
        &cfg,
        ProjectPathOracle::new(dir.path()),
        RecordingApprover::denying(),
    );

    let start = Instant::now();
    let err = service
        .run_command("sleep 3 && touch finished", None, "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::CommandTimeout { timeout_secs: 1, .. }));
    assert!(start.elapsed() < Duration::from_secs(3));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!dir.path().join("finished").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn command_runs_in_project_root_by_default() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "").unwrap();
    let mut cfg = config(dir.path());
    cfg.shell.allowed_command_level = PermissionLevel::Automatic;
    let service = ToolService::new(
        &cfg,
        ProjectPathOracle::new(dir.path()),
        RecordingApprover::denying(),
    );

    let result = service.run_command("ls", None, "c1").await.unwrap();
    assert!(result.stdout.contains("marker.txt"));
}

#[tokio::test]
async fn working_directory_outside_root_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let err = service
        .run_command("ls", Some("../.."), "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidPath { .. }));
    let err = service
        .run_command("ls", Some("does-not-exist"), "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidPath { .. }));
    assert_eq!(approver.prompts(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn failing_command_reports_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let service = project_service(dir.path(), &RecordingApprover::approving());
    let err = service
        .run_command("ls no-such-entry", None, "c1")
        .await
        .unwrap_err();
    let ToolError::CommandFailed { exit_code, stderr, .. } = err else {
        panic!("expected CommandFailed");
    };
    assert_ne!(exit_code, 0);
    assert!(stderr.contains("no-such-entry"));
}

// -- web_fetch --

#[tokio::test]
async fn metadata_url_rejected_before_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let service = project_service(dir.path(), &approver);

    let err = service
        .web_fetch("http://169.254.169.254/latest/meta-data", "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidPath { .. }));
    let err = service.web_fetch("file:///etc/passwd", "c1").await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidPath { .. }));
    assert_eq!(approver.prompts(), 0);
}

#[tokio::test]
async fn declined_fetch_is_permission_denied() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.fetch.permission_level = PermissionLevel::AskAlways;
    let approver = RecordingApprover::denying();
    let service = ToolService::new(&cfg, ProjectPathOracle::new(dir.path()), approver.clone());

    let err = service
        .web_fetch("https://example.com/docs", "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::PermissionDenied { .. }));
    assert_eq!(approver.prompts(), 1);
}

// -- concurrent approvals --

#[tokio::test]
async fn pending_approval_does_not_block_other_calls() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "keep going").unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let gate = ApprovalGate::new().with_notifier(tx);
    let service = Arc::new(ToolService::new(
        &config(dir.path()),
        ProjectPathOracle::new(dir.path()),
        SessionApprovalOracle::new(gate.clone(), SessionApprovals::new()),
    ));

    let writer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.write_file("out.txt", "later", "c1").await })
    };
    let pending = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.request.tool_name, "write_file");

    let content = tokio::time::timeout(Duration::from_secs(5), service.read_file("notes.txt", "c2"))
        .await
        .expect("read blocked behind a pending approval")
        .unwrap();
    assert_eq!(content, "keep going");
    assert!(!writer.is_finished());
    assert!(!dir.path().join("out.txt").exists());

    assert!(gate.resolve(pending.id, true));
    writer.await.unwrap().unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
        "later"
    );
}

// -- service switch --

#[tokio::test]
async fn disabled_service_refuses_everything() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    let mut cfg = config(dir.path());
    cfg.enabled = false;
    let approver = RecordingApprover::approving();
    let service = ToolService::new(&cfg, ProjectPathOracle::new(dir.path()), approver.clone());

    assert!(matches!(
        service.read_file("a.txt", "c1").await,
        Err(ToolError::ServiceDisabled)
    ));
    assert!(matches!(
        service.run_command("ls", None, "c1").await,
        Err(ToolError::ServiceDisabled)
    ));
    assert_eq!(approver.prompts(), 0);
}

// -- router --

fn router(root: &Path, approver: &RecordingApprover) -> ToolRouter<ProjectPathOracle, RecordingApprover> {
    ToolRouter::new(project_service(root, approver))
}

#[tokio::test]
async fn router_unknown_tool_lists_available() {
    let dir = tempfile::tempdir().unwrap();
    let out = router(dir.path(), &RecordingApprover::approving())
        .execute("bash", &ToolArgs::new(), "c1")
        .await;
    assert!(out.starts_with("Unknown tool: 'bash'. Available tools: read_file, write_file"));
    assert!(out.contains("web_fetch"));
}

#[tokio::test]
async fn router_reports_missing_argument() {
    let dir = tempfile::tempdir().unwrap();
    let approver = RecordingApprover::approving();
    let out = router(dir.path(), &approver)
        .execute("write_file", &ToolArgs::new().with("path", "a.txt"), "c1")
        .await;
    assert!(out.contains("missing required parameter: content"), "{out}");
    assert_eq!(approver.prompts(), 0);
    assert!(!dir.path().join("a.txt").exists());
}

#[tokio::test]
async fn router_renders_successes() {
    let dir = tempfile::tempdir().unwrap();
    let r = router(dir.path(), &RecordingApprover::approving());

    let out = r
        .execute(
            "write_file",
            &ToolArgs::new().with("path", "a.txt").with("content", "hello"),
            "c1",
        )
        .await;
    assert!(out.starts_with("Wrote 5 bytes to "), "{out}");
    assert!(out.ends_with("a.txt"));

    let out = r
        .execute(
            "edit_file",
            &ToolArgs::new()
                .with("path", "a.txt")
                .with("old_text", "hello")
                .with("new_text", "hello"),
            "c1",
        )
        .await;
    assert_eq!(out, "No changes needed");

    let out = r
        .execute(
            "edit_file",
            &ToolArgs::new()
                .with("path", "a.txt")
                .with("old_text", "hello")
                .with("new_text", "goodbye"),
            "c1",
        )
        .await;
    assert!(out.starts_with("Edited "), "{out}");
    assert!(out.ends_with("(7 bytes)"));

    let out = r
        .execute("read_file", &ToolArgs::new().with("path", "a.txt"), "c1")
        .await;
    assert_eq!(out, "goodbye");

    std::fs::create_dir(dir.path().join("src")).unwrap();
    let out = r
        .execute("list_directory", &ToolArgs::new().with("path", "."), "c1")
        .await;
    assert_eq!(out, "[file] a.txt (7 B)\n[dir] src/");
}

#[tokio::test]
async fn router_renders_errors_for_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let r = router(dir.path(), &RecordingApprover::approving());

    let out = r
        .execute("run_command", &ToolArgs::new().with("command", "sudo ls"), "c1")
        .await;
    assert!(out.starts_with("Error: The command `sudo ls` was blocked by the sandbox"), "{out}");

    let out = r
        .execute("read_file", &ToolArgs::new().with("path", "nope.txt"), "c1")
        .await;
    assert!(out.starts_with("Error: File not found"), "{out}");
}

#[cfg(unix)]
#[tokio::test]
async fn router_renders_command_output() {
    let dir = tempfile::tempdir().unwrap();
    let r = router(dir.path(), &RecordingApprover::approving());
    let out = r
        .execute(
            "run_command",
            &ToolArgs::new().with("command", "echo out; echo err >&2"),
            "c1",
        )
        .await;
    assert!(out.starts_with("out\n[stderr]\nerr\n(exit 0, "), "{out}");
    assert!(out.ends_with("ms)"));
}

#[cfg(unix)]
#[tokio::test]
async fn router_cancellation_kills_command() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.shell.allowed_command_level = PermissionLevel::Automatic;
    let r = ToolRouter::new(ToolService::new(
        &cfg,
        ProjectPathOracle::new(dir.path()),
        RecordingApprover::denying(),
    ));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let out = r
        .execute_cancellable(
            "run_command",
            &ToolArgs::new().with("command", "sleep 2 && touch finished"),
            "c1",
            &cancel,
        )
        .await;
    assert_eq!(out, "Tool call cancelled.");
    assert!(start.elapsed() < Duration::from_secs(2));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!dir.path().join("finished").exists());
}
