mod approval;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use warden_core::Config;
use warden_tools::{
    AuditLogger, CommandDecision, CommandSandbox, PermissionPolicy, ProjectPathOracle,
    SessionApprovalOracle, SessionApprovals, ToolArgs, ToolRegistry, ToolRouter, ToolService,
};

use crate::approval::ConsolePrompt;

type CliRouter = ToolRouter<ProjectPathOracle, SessionApprovalOracle<ConsolePrompt>>;

#[derive(Parser)]
#[command(name = "warden", version)]
#[command(about = "Sandbox and mediate the shell, file, and web actions of an AI agent")]
struct Cli {
    /// Config file path (defaults to $WARDEN_CONFIG, then config/default.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a shell command without running it.
    ///
    /// Exits 0 when allowed, 1 when blocked, 2 when approval is needed.
    Check {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the tool descriptors as a JSON function list
    Tools,
    /// Run one tool call and print the result
    Exec {
        /// Tool name, e.g. read_file
        tool: String,
        /// Arguments as a JSON object; read from stdin when omitted
        #[arg(long, value_name = "JSON")]
        args: Option<String>,
        /// Conversation the call belongs to
        #[arg(long, value_name = "ID", default_value = "cli")]
        conversation: String,
        /// Approve every prompt without asking
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    init_subscriber(&config.log_level);
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Check { command } => {
            let command = command.join(" ");
            let decision = CommandSandbox::new(&config.tools.shell).validate(&command);
            println!("{}", describe_decision(&decision));
            Ok(ExitCode::from(decision_exit_code(&decision)))
        }
        Command::Tools => {
            let json = serde_json::to_string_pretty(&ToolRegistry::builtin().to_json())?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec {
            tool,
            args,
            conversation,
            yes,
        } => {
            let raw = match args {
                Some(raw) => raw,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("reading tool arguments from stdin")?;
                    buf
                }
            };
            let args = parse_args(&raw)?;
            let router = build_router(&config, ConsolePrompt::new(yes)).await?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let output = router
                .execute_cancellable(&tool, &args, &conversation, &cancel)
                .await;
            println!("{output}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn build_router(config: &Config, prompt: ConsolePrompt) -> anyhow::Result<CliRouter> {
    let root = match &config.tools.shell.project_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("resolving the current directory")?,
    };
    let mut tools = config.tools.clone();
    tools.shell.project_root = Some(root.clone());

    let approvals = SessionApprovalOracle::new(prompt, SessionApprovals::new())
        .with_policy(PermissionPolicy::from(tools.permissions.clone()));
    let mut service = ToolService::new(&tools, ProjectPathOracle::new(root), approvals);

    if tools.audit.enabled {
        let logger = AuditLogger::from_config(&tools.audit)
            .await
            .with_context(|| format!("opening audit log {}", tools.audit.destination))?;
        service = service.with_audit(logger);
    }

    Ok(ToolRouter::new(service))
}

fn parse_args(raw: &str) -> anyhow::Result<ToolArgs> {
    let value = if raw.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(raw).context("tool arguments are not valid JSON")?
    };
    Ok(ToolArgs::from_json(value)?)
}

fn describe_decision(decision: &CommandDecision) -> String {
    match decision {
        CommandDecision::Allowed => "allowed".to_owned(),
        CommandDecision::RequiresApproval => "requires approval".to_owned(),
        CommandDecision::Blocked { reason } => format!("blocked: {reason}"),
    }
}

fn decision_exit_code(decision: &CommandDecision) -> u8 {
    match decision {
        CommandDecision::Allowed => 0,
        CommandDecision::Blocked { .. } => 1,
        CommandDecision::RequiresApproval => 2,
    }
}

fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("WARDEN_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// Logs go to stderr; stdout carries tool output. `RUST_LOG` wins over the config level.
fn init_subscriber(log_level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
