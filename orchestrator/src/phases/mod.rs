//! The four check phases and the state they share.
//!
//! Phases run strictly in order. Each check gates itself on the prerequisites
//! it declares and records exactly one outcome in the ledger; failures never
//! propagate across a phase boundary.

pub mod build;
pub mod environment;
pub mod integration;
pub mod runtime;

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::core::ledger::ResultLedger;
use crate::core::output::first_lines;
use crate::core::types::FailureKind;
use crate::io::config::OrchestratorConfig;
use crate::io::http::HttpProbe;
use crate::io::managed::NodeControl;
use crate::io::tools::{Invocation, ToolOutput, ToolRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Environment,
    Build,
    Runtime,
    Integration,
    Reporting,
}

impl Phase {
    pub fn title(self) -> &'static str {
        match self {
            Phase::Environment => "Phase 1: Environment Validation",
            Phase::Build => "Phase 2: Build Verification",
            Phase::Runtime => "Phase 3: Runtime Testing",
            Phase::Integration => "Phase 4: Integration Testing",
            Phase::Reporting => "Phase 5: Cleanup & Reporting",
        }
    }
}

/// Everything a phase needs, threaded explicitly through the run.
pub struct RunContext<'a, T: ToolRunner, H: HttpProbe, N: NodeControl> {
    pub root: &'a Path,
    pub config: &'a OrchestratorConfig,
    pub tools: &'a T,
    pub http: &'a H,
    pub node: &'a mut N,
    pub ledger: ResultLedger,
    /// Compiled upstream-compatibility error signatures.
    pub compat: Vec<Regex>,
    /// Set only after the health check passes; cleared when the node stops.
    pub node_ready: bool,
    /// Print phase banners to stdout.
    pub echo: bool,
}

impl<'a, T: ToolRunner, H: HttpProbe, N: NodeControl> RunContext<'a, T, H, N> {
    /// Context with a live ledger. Compat patterns are compiled here so a bad
    /// pattern fails the run before any check executes.
    pub fn new(
        root: &'a Path,
        config: &'a OrchestratorConfig,
        tools: &'a T,
        http: &'a H,
        node: &'a mut N,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            root,
            config,
            tools,
            http,
            node,
            ledger: ResultLedger::new(),
            compat: config.crud.compat_matchers()?,
            node_ready: false,
            echo: true,
        })
    }

    /// Suppress operator output (ledger echo and banners).
    pub fn quiet(mut self) -> Self {
        self.ledger = ResultLedger::silent();
        self.echo = false;
        self
    }

    pub fn banner(&self, phase: Phase) {
        if self.echo {
            println!("\n=== {} ===", phase.title());
        }
    }

    /// Resolve a configured path against the project root.
    pub fn path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Run `invocation` from the project root.
    pub fn run_tool(&self, invocation: Invocation) -> ToolOutput {
        self.tools.run(&invocation.in_dir(self.root))
    }

    /// Liveness is re-probed on every call.
    pub fn node_running(&mut self) -> bool {
        self.node.is_running()
    }

    pub fn stop_node(&mut self) {
        self.node.stop();
        self.node_ready = false;
    }

    /// Truncate tool output to the configured number of lines.
    pub fn detail(&self, text: &str) -> String {
        first_lines(text, self.config.detail_lines)
    }

    /// Classify a tool invocation that did not succeed.
    pub fn tool_failure(&self, output: &ToolOutput, tool: &str) -> (FailureKind, String) {
        if output.missing {
            (FailureKind::ToolMissing, format!("{tool} not found in PATH"))
        } else if output.timed_out {
            (
                FailureKind::Timeout,
                format!("{tool} timed out after {}s", self.config.tool_timeout_secs),
            )
        } else {
            let detail = self.detail(output.diagnostic());
            let detail = if detail.is_empty() {
                format!("{tool} exited with {:?}", output.exit_code)
            } else {
                detail
            };
            (FailureKind::CompileFailure, detail)
        }
    }

    /// Record a failed tool invocation.
    pub fn record_tool_failure(&mut self, name: &str, output: &ToolOutput, tool: &str) {
        let (kind, detail) = self.tool_failure(output, tool);
        self.ledger.fail(name, kind, detail);
    }

    /// Whether `text` carries a known upstream-compatibility error.
    pub fn is_compat_error(&self, text: &str) -> bool {
        crate::core::output::matches_any(&self.compat, text)
    }
}

/// `cargo build --release -p <package>`.
pub fn cargo_build(package: &str) -> Invocation {
    Invocation::new("cargo", ["build", "--release", "-p", package])
}
