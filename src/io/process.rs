use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("missing command `{0}` on PATH")]
    Missing(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command failed: `{command}` (status: {status}){}", stderr_suffix(stderr))]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{}", stderr_suffix(stderr))]
    TimedOut {
        command: String,
        timeout_ms: u64,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {}", tail(trimmed, 2000))
    }
}

/// Last `max` bytes of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Runs `program` to completion, capturing stdout and stderr.
///
/// With a timeout the child is polled and killed once the limit elapses.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<Output, CommandError> {
    if !command_exists(program) {
        return Err(CommandError::Missing(program.to_owned()));
    }

    let rendered = format!("{} {}", program, args.join(" "));

    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let Some(limit) = timeout else {
        let output = command
            .output()
            .map_err(|e| spawn_error(&rendered, e))?;
        return validate_output(rendered, output);
    };

    let mut child = command.spawn().map_err(|e| spawn_error(&rendered, e))?;
    let started_at = Instant::now();

    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());

    loop {
        if let Some(status) = child.try_wait().map_err(|e| spawn_error(&rendered, e))? {
            let stdout = stdout_rx.recv().unwrap_or_default();
            let stderr = stderr_rx.recv().unwrap_or_default();
            return validate_output(
                rendered,
                Output {
                    status,
                    stdout,
                    stderr,
                },
            );
        }

        if started_at.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            let stderr = stderr_rx
                .recv_timeout(Duration::from_millis(500))
                .unwrap_or_default();
            return Err(CommandError::TimedOut {
                command: rendered,
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        thread::sleep(Duration::from_millis(50));
    }
}

fn spawn_error(command: &str, source: std::io::Error) -> CommandError {
    CommandError::Spawn {
        command: command.to_owned(),
        source,
    }
}

/// Reads a pipe to the end on a helper thread so the child never blocks on a
/// full pipe buffer.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn validate_output(command: String, output: Output) -> Result<Output, CommandError> {
    if output.status.success() {
        return Ok(output);
    }
    Err(CommandError::Failed {
        command,
        status: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
