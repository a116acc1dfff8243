//! Test-only fakes for the tool, HTTP and node seams, plus a temp project
//! workspace.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::io::config::OrchestratorConfig;
use crate::io::http::HttpProbe;
use crate::io::managed::{NodeControl, NodeLaunch, SpawnError};
use crate::io::tools::{Invocation, ToolOutput, ToolRunner};

/// Default config with every sleep and settle delay set to zero.
pub fn test_config() -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.node.settle_secs = 0;
    cfg.node.stop_grace_secs = 0;
    cfg.readiness.health_interval_secs = 0;
    cfg.readiness.rpc_interval_secs = 0;
    cfg.readiness.progress_settle_secs = 0;
    cfg
}

/// Tool runner answering from substring-matched scripts.
///
/// The first rule whose pattern occurs in the command line answers. Each rule
/// replays its queued outputs in order and repeats the last one. Unmatched
/// commands behave like a missing executable.
#[derive(Debug, Default)]
pub struct ScriptedTools {
    rules: RefCell<Vec<(String, VecDeque<ToolOutput>)>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, output: ToolOutput) -> Self {
        {
            let mut rules = self.rules.borrow_mut();
            match rules.iter_mut().find(|(p, _)| p == pattern) {
                Some((_, queue)) => queue.push_back(output),
                None => rules.push((pattern.to_string(), VecDeque::from([output]))),
            }
        }
        self
    }

    /// Command lines seen so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ToolRunner for ScriptedTools {
    fn run(&self, invocation: &Invocation) -> ToolOutput {
        let line = invocation.display();
        self.calls.borrow_mut().push(line.clone());
        let mut rules = self.rules.borrow_mut();
        let Some((_, queue)) = rules.iter_mut().find(|(p, _)| line.contains(p.as_str())) else {
            return ToolOutput::not_found(&invocation.program);
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}

/// HTTP fake. Health answers replay in order (last repeats; none means
/// connection refused). Block heights are consumed once each.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    health: RefCell<VecDeque<u16>>,
    heights: RefCell<VecDeque<Option<u64>>>,
    reachable: bool,
    health_calls: Cell<usize>,
    rpc_calls: Cell<usize>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reachable(mut self, reachable: bool) -> Self {
        self.reachable = reachable;
        self
    }

    pub fn health(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.health.borrow_mut().extend(statuses);
        self
    }

    pub fn heights(self, heights: impl IntoIterator<Item = Option<u64>>) -> Self {
        self.heights.borrow_mut().extend(heights);
        self
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.get()
    }

    pub fn rpc_calls(&self) -> usize {
        self.rpc_calls.get()
    }
}

impl HttpProbe for ScriptedHttp {
    fn get_status(&self, url: &str) -> Result<u16> {
        if !url.ends_with("/health") {
            return if self.reachable {
                Ok(200)
            } else {
                Err(anyhow!("dns error: failed to lookup {url}"))
            };
        }
        self.health_calls.set(self.health_calls.get() + 1);
        let mut health = self.health.borrow_mut();
        let status = if health.len() > 1 {
            health.pop_front()
        } else {
            health.front().copied()
        };
        status.ok_or_else(|| anyhow!("connection refused"))
    }

    fn rpc(&self, _url: &str, method: &str, _params: Value) -> Result<Value> {
        self.rpc_calls.set(self.rpc_calls.get() + 1);
        if method != "chain_getHeader" {
            return Err(anyhow!("unexpected method {method}"));
        }
        match self.heights.borrow_mut().pop_front().flatten() {
            Some(height) => Ok(json!({ "number": format!("{height:#x}"), "parentHash": "0x00" })),
            None => Err(anyhow!("connection refused")),
        }
    }
}

/// Node fake: no process, just state and counters.
#[derive(Debug)]
pub struct FakeNode {
    start_result: Result<u32, SpawnError>,
    alive: bool,
    starts: usize,
    stops: usize,
    last_launch: Option<NodeLaunch>,
}

impl FakeNode {
    /// Not yet started; a start succeeds.
    pub fn new() -> Self {
        Self {
            start_result: Ok(4242),
            alive: false,
            starts: 0,
            stops: 0,
            last_launch: None,
        }
    }

    /// Already running, as after a successful start.
    pub fn running() -> Self {
        Self {
            alive: true,
            ..Self::new()
        }
    }

    /// Every start fails with `err`.
    pub fn failing(err: SpawnError) -> Self {
        Self {
            start_result: Err(err),
            ..Self::new()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts
    }

    pub fn stops(&self) -> usize {
        self.stops
    }

    pub fn last_launch(&self) -> Option<&NodeLaunch> {
        self.last_launch.as_ref()
    }
}

impl Default for FakeNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeControl for FakeNode {
    fn start(&mut self, launch: &NodeLaunch) -> Result<u32, SpawnError> {
        self.starts += 1;
        self.last_launch = Some(launch.clone());
        let result = self.start_result.clone();
        self.alive = result.is_ok();
        result
    }

    fn is_running(&mut self) -> bool {
        self.alive
    }

    fn stop(&mut self) {
        self.stops += 1;
        self.alive = false;
    }
}

/// Temporary project root with helpers for placing build outputs.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp workspace");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` at `relative`, creating parent directories.
    pub fn write(&self, relative: impl AsRef<Path>, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write workspace file");
        path
    }

    pub fn read(&self, relative: impl AsRef<Path>) -> String {
        fs::read_to_string(self.dir.path().join(relative)).expect("read workspace file")
    }

    pub fn node_binary(&self, cfg: &OrchestratorConfig) -> PathBuf {
        self.write(&cfg.node.binary, "node")
    }

    pub fn deployer_binary(&self, cfg: &OrchestratorConfig) -> PathBuf {
        self.write(&cfg.deployer.binary, "deployer")
    }

    pub fn runtime_wasm(&self, cfg: &OrchestratorConfig) -> PathBuf {
        self.write(&cfg.runtime.wasm_artifact, "\0asm")
    }

    /// Both `<name>.contract` and `<name>.json` in the artifact directory.
    pub fn contract_artifacts(&self, cfg: &OrchestratorConfig, name: &str) {
        let dir = &cfg.contracts.artifact_dir;
        self.write(dir.join(format!("{name}.contract")), "{}");
        self.write(dir.join(format!("{name}.json")), "{}");
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

pub const CONTRACT_ADDRESS: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

const CALL_OK: &str = r#"{"reverted": false, "data": {"Ok": null}}"#;

/// Scripts for a passing toolchain probe and successful builds.
pub fn toolchain_happy_path(tools: ScriptedTools) -> ScriptedTools {
    tools
        .on("rustc --version", ToolOutput::ok("rustc 1.85.0 (4d91de4e4 2025-02-17)\n"))
        .on(
            "rustup target list --installed",
            ToolOutput::ok("x86_64-unknown-linux-gnu\nwasm32-unknown-unknown\n"),
        )
        .on("cargo contract --version", ToolOutput::ok("cargo-contract-contract 5.0.1\n"))
        .on("cargo --version", ToolOutput::ok("cargo 1.85.0\n"))
        .on("release/node --version", ToolOutput::ok("node 1.0.0-dev\n"))
        .on("cargo build --release", ToolOutput::ok(""))
        .on("cargo contract build", ToolOutput::ok(""))
}

/// Scripts for a deployer run and a CRUD cycle where every step passes.
pub fn crud_happy_path(tools: ScriptedTools) -> ScriptedTools {
    tools
        .on("cargo build --release", ToolOutput::ok(""))
        .on("--account", ToolOutput::ok("Deployed 2 contracts\n"))
        .on(
            "cargo contract instantiate",
            ToolOutput::ok(format!(
                r#"{{"contract": "{CONTRACT_ADDRESS}", "code_hash": "0x00"}}"#
            )),
        )
        .on("--message grant_entitlement", ToolOutput::ok(CALL_OK))
        .on(
            "--message get_entitlement",
            ToolOutput::ok(r#"{"reverted": false, "data": {"Ok": "Premium"}}"#),
        )
        .on(
            "--message get_entitlement",
            ToolOutput::ok(r#"{"reverted": false, "data": {"Ok": "None"}}"#),
        )
        .on(
            "--message has_entitlement",
            ToolOutput::ok(r#"{"reverted": false, "data": {"Ok": true}}"#),
        )
        .on("--message revoke_entitlement", ToolOutput::ok(CALL_OK))
}
