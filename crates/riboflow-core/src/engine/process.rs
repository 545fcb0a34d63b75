use crate::tools::Invocation;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// How much of a failing process's stderr is kept on the failure marker.
const STDERR_TAIL_CHARS: usize = 2000;

/// Terminal status of one external invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CmdStatus {
    Success,
    Failed { code: Option<i32> },
    TimedOut { after: Duration },
    SpawnError { message: String },
}

/// Result of running one [`Invocation`].
#[derive(Debug, Clone)]
pub struct CmdOutcome {
    pub status: CmdStatus,
    /// Tail of the captured stderr, for failure diagnostics.
    pub stderr_tail: String,
    pub elapsed: Duration,
}

impl CmdOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CmdStatus::Success
    }

    /// A one-line diagnostic for failure markers. Empty for successes.
    pub fn failure_reason(&self) -> String {
        match &self.status {
            CmdStatus::Success => String::new(),
            CmdStatus::Failed { code } => {
                let code = code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into());
                if self.stderr_tail.is_empty() {
                    format!("exit code {code}")
                } else {
                    format!("exit code {code}: {}", self.stderr_tail.trim())
                }
            }
            CmdStatus::TimedOut { after } => {
                format!("timed out after {}s", after.as_secs())
            }
            CmdStatus::SpawnError { message } => format!("failed to start: {message}"),
        }
    }
}

/// Executes invocations with a per-invocation timeout, capturing stdout and
/// stderr to per-tag log files. The runner is the only component in the
/// crate that spawns processes.
pub struct CommandRunner {
    logs_dir: PathBuf,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(logs_dir: PathBuf, timeout: Duration) -> Self {
        Self { logs_dir, timeout }
    }

    /// Runs `invocation` to completion or timeout. `tag` names the log
    /// files (`<tag>.stdout` / `<tag>.stderr`).
    ///
    /// Process-level failures are data, not errors: they are reported in
    /// the returned outcome so a member failure never aborts its ensemble.
    /// Children are killed when the future is dropped, so cancelling a
    /// pipeline run does not leak external processes.
    pub async fn run(&self, tag: &str, invocation: &Invocation) -> CmdOutcome {
        debug!(
            tag,
            program = %invocation.program,
            args = ?invocation.args,
            "Running external command"
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                return CmdOutcome {
                    status: CmdStatus::SpawnError {
                        message: source.to_string(),
                    },
                    stderr_tail: String::new(),
                    elapsed: start.elapsed(),
                };
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let elapsed = start.elapsed();
                self.write_log(tag, "stdout", &output.stdout);
                self.write_log(tag, "stderr", &output.stderr);

                let stderr_tail = tail(&String::from_utf8_lossy(&output.stderr));
                let status = if output.status.success() {
                    CmdStatus::Success
                } else {
                    CmdStatus::Failed {
                        code: output.status.code(),
                    }
                };
                debug!(tag, ?status, elapsed_s = elapsed.as_secs_f64(), "Command finished");
                CmdOutcome {
                    status,
                    stderr_tail,
                    elapsed,
                }
            }
            Ok(Err(source)) => CmdOutcome {
                status: CmdStatus::SpawnError {
                    message: source.to_string(),
                },
                stderr_tail: String::new(),
                elapsed: start.elapsed(),
            },
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => {
                warn!(tag, timeout_s = self.timeout.as_secs(), "Command timed out");
                CmdOutcome {
                    status: CmdStatus::TimedOut {
                        after: self.timeout,
                    },
                    stderr_tail: String::new(),
                    elapsed: start.elapsed(),
                }
            }
        }
    }

    fn write_log(&self, tag: &str, stream: &str, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Err(error) = std::fs::create_dir_all(&self.logs_dir)
            .and_then(|_| std::fs::write(self.logs_dir.join(format!("{tag}.{stream}")), bytes))
        {
            warn!(tag, stream, %error, "Could not write process log");
        }
    }
}

fn tail(text: &str) -> String {
    if text.len() <= STDERR_TAIL_CHARS {
        return text.to_string();
    }
    let start = text.len() - STDERR_TAIL_CHARS;
    // Avoid splitting a UTF-8 code point.
    let boundary = (start..text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(text.len());
    text[boundary..].to_string()
}
