use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::{STDERR_PREVIEW_CHARS, ToolError, preview};
use crate::output::CommandResult;

/// How long pipes are still read after the shell exits.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Kills the shell's process group when dropped while armed.
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid
            && let Ok(raw) = i32::try_from(pgid)
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                tracing::debug!(pgid, "killpg failed: {e}");
            }
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        self.kill();
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn drain<R>(stream: Option<R>) -> (SharedBuf, tokio::task::JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = SharedBuf::default();
    let sink = Arc::clone(&buf);
    let task = tokio::spawn(async move {
        let Some(mut stream) = stream else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buf, task)
}

/// Run `command` through the platform shell, killing it once `timeout` elapses.
///
/// On unix the shell leads its own process group, and a timeout or a dropped future kills
/// the whole group. Both pipes are drained into shared buffers. A background job that keeps
/// a pipe open after the shell exits gets a short grace period, then whatever was read so
/// far is returned. A non-zero exit is reported as [`ToolError::CommandFailed`].
pub(crate) async fn run_shell(
    command: &str,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandResult, ToolError> {
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;

    let mut cmd = shell_command(command);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::CommandFailed {
            command: command.to_owned(),
            exit_code: -1,
            stderr: format!("failed to start shell: {e}"),
        })?;
    let mut group = GroupKill { pgid: child.id() };

    let (stdout_buf, stdout_task) = drain(child.stdout.take());
    let (stderr_buf, stderr_task) = drain(child.stderr.take());

    let status = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            return Err(ToolError::CommandFailed {
                command: command.to_owned(),
                exit_code: -1,
                stderr: format!("failed to wait for process: {e}"),
            });
        }
        Err(_) => {
            group.kill();
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            tracing::warn!(command, timeout_secs = timeout.as_secs(), "command timed out");
            return Err(ToolError::CommandTimeout {
                command: command.to_owned(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };
    // Background jobs of a finished command are left running.
    group.disarm();

    let grace = (tokio::time::Instant::now() + DRAIN_GRACE).min(deadline);
    let stdout = collect(stdout_task, &stdout_buf, grace).await;
    let stderr = collect(stderr_task, &stderr_buf, grace).await;
    let exit_code = status.code().unwrap_or(-1);
    let duration = start.elapsed();

    tracing::debug!(command, exit_code, duration_ms = duration.as_millis(), "command finished");

    if exit_code != 0 {
        return Err(ToolError::CommandFailed {
            command: command.to_owned(),
            exit_code,
            stderr: preview(&stderr, STDERR_PREVIEW_CHARS),
        });
    }

    Ok(CommandResult {
        exit_code,
        stdout,
        stderr,
        duration,
    })
}

async fn collect(
    mut task: tokio::task::JoinHandle<()>,
    buf: &SharedBuf,
    until: tokio::time::Instant,
) -> String {
    if tokio::time::timeout_at(until, &mut task).await.is_err() {
        tracing::debug!("pipe still open after exit; returning partial output");
        task.abort();
    }
    let bytes = buf.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}
