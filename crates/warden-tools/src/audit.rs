use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::config::AuditConfig;
use crate::error::ToolError;

/// JSON-lines record of every mediated tool call.
#[derive(Debug)]
pub struct AuditLogger {
    destination: AuditDestination,
}

#[derive(Debug)]
enum AuditDestination {
    Stdout,
    File(tokio::sync::Mutex<tokio::fs::File>),
}

#[derive(Debug, serde::Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub tool: String,
    pub conversation_id: String,
    pub details: String,
    pub result: AuditResult,
    pub duration_ms: u64,
}

impl AuditEntry {
    #[must_use]
    pub fn now(tool: &str, conversation_id: &str, details: &str, result: AuditResult) -> Self {
        Self {
            timestamp: DateTime::<Utc>::from(SystemTime::now()).to_rfc3339(),
            tool: tool.to_owned(),
            conversation_id: conversation_id.to_owned(),
            details: details.to_owned(),
            result,
            duration_ms: 0,
        }
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "type")]
pub enum AuditResult {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "blocked")]
    Blocked { reason: String },
    #[serde(rename = "denied")]
    Denied,
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "timeout")]
    Timeout,
}

impl AuditResult {
    /// Audit classification of a mediator outcome.
    #[must_use]
    pub fn from_outcome<T>(outcome: &Result<T, ToolError>) -> Self {
        match outcome {
            Ok(_) => Self::Success,
            Err(ToolError::SandboxBlocked { reason, .. }) => Self::Blocked {
                reason: reason.clone(),
            },
            Err(ToolError::PermissionDenied { .. }) => Self::Denied,
            Err(ToolError::CommandTimeout { .. }) => Self::Timeout,
            Err(e) => Self::Error {
                message: e.to_string(),
            },
        }
    }
}

impl AuditLogger {
    /// Create a new `AuditLogger` from config.
    ///
    /// # Errors
    ///
    /// Returns an error if a file destination cannot be opened.
    pub async fn from_config(config: &AuditConfig) -> Result<Self, std::io::Error> {
        let destination = if config.destination == "stdout" {
            AuditDestination::Stdout
        } else {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(Path::new(&config.destination))
                .await?;
            AuditDestination::File(tokio::sync::Mutex::new(file))
        };

        Ok(Self { destination })
    }

    pub async fn log(&self, entry: &AuditEntry) {
        let Ok(json) = serde_json::to_string(entry) else {
            return;
        };

        match &self.destination {
            AuditDestination::Stdout => {
                tracing::info!(target: "audit", "{json}");
            }
            AuditDestination::File(file) => {
                use tokio::io::AsyncWriteExt;
                let mut f = file.lock().await;
                let line = format!("{json}\n");
                if let Err(e) = f.write_all(line.as_bytes()).await {
                    tracing::error!("failed to write audit log: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(result: AuditResult) -> AuditEntry {
        AuditEntry::now("run_command", "conv-1", "echo hello", result).with_duration_ms(42)
    }

    #[test]
    fn audit_entry_serialization() {
        let json = serde_json::to_string(&entry(AuditResult::Success)).unwrap();
        assert!(json.contains("\"type\":\"success\""));
        assert!(json.contains("\"tool\":\"run_command\""));
        assert!(json.contains("\"conversation_id\":\"conv-1\""));
        assert!(json.contains("\"duration_ms\":42"));
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let e = entry(AuditResult::Success);
        assert!(DateTime::parse_from_rfc3339(&e.timestamp).is_ok());
    }

    #[test]
    fn outcome_classification() {
        let blocked: Result<(), ToolError> = Err(ToolError::SandboxBlocked {
            command: "sudo ls".into(),
            reason: "blocked pattern: sudo".into(),
        });
        let json = serde_json::to_string(&entry(AuditResult::from_outcome(&blocked))).unwrap();
        assert!(json.contains("\"type\":\"blocked\""));
        assert!(json.contains("\"reason\":\"blocked pattern: sudo\""));

        let denied: Result<(), ToolError> = Err(ToolError::PermissionDenied {
            tool: "write_file".into(),
            details: "a.txt".into(),
        });
        assert!(matches!(AuditResult::from_outcome(&denied), AuditResult::Denied));

        let timeout: Result<(), ToolError> = Err(ToolError::CommandTimeout {
            command: "sleep 9".into(),
            timeout_secs: 1,
        });
        assert!(matches!(AuditResult::from_outcome(&timeout), AuditResult::Timeout));

        let failed: Result<(), ToolError> = Err(ToolError::EmptySearchText);
        assert!(matches!(
            AuditResult::from_outcome(&failed),
            AuditResult::Error { .. }
        ));
        assert!(matches!(
            AuditResult::from_outcome(&Ok::<_, ToolError>(())),
            AuditResult::Success
        ));
    }

    #[tokio::test]
    async fn audit_logger_stdout() {
        let config = AuditConfig {
            enabled: true,
            destination: "stdout".into(),
        };
        let logger = AuditLogger::from_config(&config).await.unwrap();
        logger.log(&entry(AuditResult::Success)).await;
    }

    #[tokio::test]
    async fn audit_logger_file_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let config = AuditConfig {
            enabled: true,
            destination: path.display().to_string(),
        };
        let logger = AuditLogger::from_config(&config).await.unwrap();

        for _ in 0..3 {
            logger.log(&entry(AuditResult::Timeout)).await;
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 3);
        for line in content.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["result"]["type"], "timeout");
        }
    }

    #[tokio::test]
    async fn audit_logger_unopenable_file_errors() {
        let config = AuditConfig {
            enabled: true,
            destination: "/nonexistent/dir/audit.log".into(),
        };
        assert!(AuditLogger::from_config(&config).await.is_err());
    }
}
