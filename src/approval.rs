use dialoguer::Confirm;
use warden_tools::{ApprovalPrompt, ApprovalRequest};

/// Terminal approval prompt on stderr.
#[derive(Debug, Clone, Copy)]
pub struct ConsolePrompt {
    assume_yes: bool,
}

impl ConsolePrompt {
    #[must_use]
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl ApprovalPrompt for ConsolePrompt {
    async fn prompt(&self, request: &ApprovalRequest) -> bool {
        if self.assume_yes {
            tracing::info!(tool = %request.tool_name, details = %request.details, "auto-approved");
            return true;
        }
        let request = request.clone();
        match tokio::task::spawn_blocking(move || confirm(&request)).await {
            Ok(approved) => approved,
            Err(e) => {
                tracing::warn!("approval prompt failed: {e}");
                false
            }
        }
    }
}

fn confirm(request: &ApprovalRequest) -> bool {
    eprintln!();
    eprintln!("{}", request.description);
    if let Some(diff) = &request.diff_preview {
        eprintln!("{diff}");
    }
    Confirm::new()
        .with_prompt(format!("Allow {}?", request.tool_name))
        .default(false)
        .interact()
        .unwrap_or_else(|e| {
            tracing::warn!("cannot read approval answer: {e}");
            false
        })
}
