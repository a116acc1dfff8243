//! Helpers for running child processes with timeouts and bounded output, and
//! for spawning and signalling long-running background processes.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Decoded output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// Both pipes are drained on scoped reader threads while the child runs; at
/// most `output_limit_bytes` of each stream is kept and the rest discarded.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, timeout: Duration, output_limit_bytes: usize) -> Result<Captured> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn command")?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    thread::scope(|scope| -> Result<Captured> {
        let stdout_reader = scope.spawn(move || drain_bounded(stdout, output_limit_bytes));
        let stderr_reader = scope.spawn(move || drain_bounded(stderr, output_limit_bytes));
        let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
        let (stdout, stdout_dropped) = joined(stdout_reader).context("read stdout")?;
        let (stderr, stderr_dropped) = joined(stderr_reader).context("read stderr")?;
        if stdout_dropped > 0 || stderr_dropped > 0 {
            warn!(stdout_dropped, stderr_dropped, "output truncated");
        }
        debug!(exit_code = ?status.code(), timed_out, "command finished");
        Ok(Captured {
            exit_code: status.code(),
            stdout,
            stderr,
            timed_out,
        })
    })
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
    child.kill().context("kill timed-out command")?;
    let status = child.wait().context("reap killed command")?;
    Ok((status, true))
}

fn joined(handle: thread::ScopedJoinHandle<'_, io::Result<(String, u64)>>) -> Result<(String, u64)> {
    match handle.join() {
        Ok(drained) => Ok(drained?),
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Keep the first `limit` bytes (lossily decoded), discard the rest. Returns
/// the kept text and the number of discarded bytes.
fn drain_bounded<R: Read>(mut reader: R, limit: usize) -> io::Result<(String, u64)> {
    let mut kept = Vec::new();
    (&mut reader)
        .take(u64::try_from(limit).unwrap_or(u64::MAX))
        .read_to_end(&mut kept)?;
    let dropped = io::copy(&mut reader, &mut io::sink())?;
    Ok((String::from_utf8_lossy(&kept).into_owned(), dropped))
}

/// Spawn a background process with stdout and stderr both appended to `log_path`.
#[instrument(skip_all, fields(program = %program.display(), log = %log_path.display()))]
pub fn spawn_logged(
    program: &Path,
    args: &[String],
    cwd: &Path,
    log_path: &Path,
) -> Result<Child> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let log = File::create(log_path)
        .with_context(|| format!("create log file {}", log_path.display()))?;
    let log_err = log.try_clone().context("clone log handle")?;

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn();
    match child {
        Ok(child) => {
            debug!(pid = child.id(), "background process spawned");
            Ok(child)
        }
        Err(e) => {
            error!(err = %e, "failed to spawn background process");
            Err(e).with_context(|| format!("spawn {}", program.display()))
        }
    }
}

/// Process-control signals sent through the `kill` utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    fn name(self) -> &'static str {
        match self {
            Signal::Terminate => "TERM",
            Signal::Kill => "KILL",
        }
    }
}

/// Send `signal` to `pid`. Returns whether delivery succeeded; a gone target
/// is reported as `false`, never as an error.
pub fn send_signal(pid: u32, signal: Signal) -> bool {
    if pid == 0 {
        return false;
    }
    match Command::new("kill")
        .arg(format!("-{}", signal.name()))
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!(pid, signal = signal.name(), err = %e, "failed to send signal");
            false
        }
    }
}

/// Non-blocking existence probe for an arbitrary PID (`kill -0` equivalent).
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    if cfg!(target_os = "linux") {
        return Path::new(&format!("/proc/{pid}")).exists();
    }

    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_bounded_keeps_prefix_and_counts_rest() {
        let data = vec![b'x'; 100];
        let (kept, dropped) = drain_bounded(&data[..], 30).expect("read");
        assert_eq!(kept.len(), 30);
        assert_eq!(dropped, 70);

        let (kept, dropped) = drain_bounded(&b"short"[..], 30).expect("read");
        assert_eq!(kept, "short");
        assert_eq!(dropped, 0);
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!is_process_alive(0));
        assert!(!send_signal(0, Signal::Terminate));
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run_bounded(cmd, Duration::from_secs(5), 1_000).expect("run command");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn kills_command_after_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_bounded(cmd, Duration::from_millis(100), 1_000).expect("run command");
        assert!(output.timed_out);
        assert_ne!(output.exit_code, Some(0));
    }

    #[test]
    fn missing_program_is_an_error() {
        let cmd = Command::new("definitely-not-a-real-binary-3f9a");
        let err = run_bounded(cmd, Duration::from_secs(1), 100).unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
