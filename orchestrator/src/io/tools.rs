//! One-shot external command invocation.
//!
//! The [`ToolRunner`] trait decouples phase logic from real subprocesses.
//! Runners never fail: spawn errors and timeouts are folded into
//! [`ToolOutput`] so callers classify every outcome themselves.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::io::process::run_bounded;

/// A single command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Space-joined command line, for logs and test matching.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit code plus captured streams of a finished invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process never ran or was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The executable (or cargo subcommand) does not exist.
    pub missing: bool,
    pub timed_out: bool,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn not_found(program: &str) -> Self {
        Self {
            stderr: format!("{program}: command not found"),
            missing: true,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Stream most likely to explain a failure: stderr, else stdout.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Abstraction over subprocess execution.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> ToolOutput;
}

/// Runner that spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemToolRunner {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl SystemToolRunner {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl ToolRunner for SystemToolRunner {
    #[instrument(skip_all, fields(command = %invocation.display()))]
    fn run(&self, invocation: &Invocation) -> ToolOutput {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        match run_bounded(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => {
                let missing = is_missing_subcommand(&output.stderr);
                debug!(exit_code = ?output.exit_code, missing, "tool finished");
                ToolOutput {
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    missing,
                    timed_out: output.timed_out,
                }
            }
            Err(err) => {
                let not_found = err
                    .chain()
                    .filter_map(|cause| cause.downcast_ref::<io::Error>())
                    .any(|io_err| io_err.kind() == io::ErrorKind::NotFound);
                if not_found {
                    debug!(program = %invocation.program, "tool not found");
                    ToolOutput::not_found(&invocation.program)
                } else {
                    warn!(err = %format!("{err:#}"), "tool invocation failed");
                    ToolOutput {
                        stderr: format!("{err:#}"),
                        ..ToolOutput::default()
                    }
                }
            }
        }
    }
}

/// cargo reports unknown subcommands (e.g. an uninstalled `cargo contract`)
/// with exit 101 rather than a spawn error.
fn is_missing_subcommand(stderr: &str) -> bool {
    stderr.contains("no such command") || stderr.contains("no such subcommand")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let inv = Invocation::new("cargo", ["build", "--release", "-p", "node"]);
        assert_eq!(inv.display(), "cargo build --release -p node");
        assert_eq!(inv.cwd, None);
    }

    #[test]
    fn combined_and_diagnostic_prefer_non_empty_streams() {
        let out = ToolOutput {
            exit_code: Some(1),
            stdout: "progress".to_string(),
            stderr: "error: boom".to_string(),
            ..ToolOutput::default()
        };
        assert_eq!(out.combined(), "progress\nerror: boom");
        assert_eq!(out.diagnostic(), "error: boom");
        assert_eq!(ToolOutput::ok("hello").diagnostic(), "hello");
    }

    #[test]
    fn timed_out_is_not_success() {
        let out = ToolOutput {
            exit_code: Some(0),
            timed_out: true,
            ..ToolOutput::default()
        };
        assert!(!out.success());
    }

    #[test]
    fn missing_program_yields_not_found() {
        let runner = SystemToolRunner::new(Duration::from_secs(1), 1_000);
        let out = runner.run(&Invocation::new(
            "definitely-not-a-real-binary-3f9a",
            Vec::<String>::new(),
        ));
        assert!(out.missing);
        assert_eq!(out.exit_code, None);
        assert!(!out.success());
    }

    #[test]
    fn unknown_cargo_subcommand_is_missing() {
        assert!(is_missing_subcommand(
            "error: no such command: `contract`\n\n\tView all installed commands"
        ));
        assert!(!is_missing_subcommand("error[E0425]: cannot find value"));
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_requested_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = SystemToolRunner::new(Duration::from_secs(5), 10_000);
        let out = runner.run(&Invocation::new("pwd", Vec::<String>::new()).in_dir(temp.path()));
        assert!(out.success());
        let reported = std::fs::canonicalize(out.stdout.trim()).expect("canonical pwd");
        let expected = std::fs::canonicalize(temp.path()).expect("canonical temp");
        assert_eq!(reported, expected);
    }
}
