//! Phase 1: independent toolchain and network probes. Nothing is gated.

use tracing::{info, instrument};

use crate::core::types::FailureKind;
use crate::io::http::{HttpProbe, is_reachable};
use crate::io::managed::NodeControl;
use crate::io::tools::{Invocation, ToolOutput, ToolRunner};
use crate::phases::{Phase, RunContext};

#[instrument(skip_all)]
pub fn run<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    ctx.banner(Phase::Environment);
    check_rustc(ctx);
    check_wasm_target(ctx);
    check_cargo_contract(ctx);
    check_network(ctx);
    info!(counts = ?ctx.ledger.counts(), "environment phase done");
}

fn version_line(output: &ToolOutput) -> String {
    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn check_rustc<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    const NAME: &str = "Rust toolchain available";
    let output = ctx.run_tool(Invocation::new("rustc", ["--version"]));
    if output.success() {
        ctx.ledger.pass(NAME, version_line(&output));
    } else {
        ctx.record_tool_failure(NAME, &output, "rustc");
    }
}

fn check_wasm_target<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
) {
    const NAME: &str = "WASM target installed";
    let target = ctx.config.environment.wasm_target.clone();
    let output = ctx.run_tool(Invocation::new("rustup", ["target", "list", "--installed"]));
    if !output.success() {
        ctx.record_tool_failure(NAME, &output, "rustup");
        return;
    }
    if output.stdout.lines().any(|line| line.trim() == target) {
        ctx.ledger.pass(NAME, target);
    } else {
        ctx.ledger.fail(
            NAME,
            FailureKind::CheckFailed,
            format!("{target} not installed (rustup target add {target})"),
        );
    }
}

fn check_cargo_contract<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
) {
    const NAME: &str = "cargo-contract installed";
    let output = ctx.run_tool(Invocation::new("cargo", ["contract", "--version"]));
    if output.success() {
        ctx.ledger.pass(NAME, version_line(&output));
    } else {
        ctx.record_tool_failure(NAME, &output, "cargo-contract");
    }
}

fn check_network<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    const NAME: &str = "Network connectivity";
    let url = ctx.config.environment.dependency_url.clone();
    if is_reachable(ctx.http, &url) {
        ctx.ledger.pass(NAME, url);
    } else {
        ctx.ledger
            .fail(NAME, FailureKind::CheckFailed, format!("Cannot reach {url}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestResult;
    use crate::test_support::{FakeNode, ScriptedHttp, ScriptedTools, test_config};
    use std::path::Path;

    #[test]
    fn all_probes_pass() {
        let cfg = test_config();
        let tools = ScriptedTools::new()
            .on("rustc --version", ToolOutput::ok("rustc 1.85.0 (4d91de4e4 2025-02-17)\n"))
            .on(
                "rustup target list --installed",
                ToolOutput::ok("x86_64-unknown-linux-gnu\nwasm32-unknown-unknown\n"),
            )
            .on("cargo contract --version", ToolOutput::ok("cargo-contract-contract 5.0.1\n"));
        let http = ScriptedHttp::new().reachable(true);
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(Path::new("/work"), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let cases = ctx.ledger.cases();
        assert_eq!(cases.len(), 4);
        assert!(cases.iter().all(|case| case.result == TestResult::Pass));
        assert_eq!(cases[0].detail.as_deref(), Some("rustc 1.85.0 (4d91de4e4 2025-02-17)"));
    }

    #[test]
    fn missing_tools_fail_independently() {
        let cfg = test_config();
        let tools = ScriptedTools::new();
        let http = ScriptedHttp::new().reachable(false);
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(Path::new("/work"), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let cases = ctx.ledger.cases();
        assert_eq!(cases.len(), 4);
        assert_eq!(cases[0].name, "Rust toolchain available");
        assert_eq!(cases[0].result, TestResult::Fail);
        assert_eq!(cases[0].kind, Some(FailureKind::ToolMissing));
        assert_eq!(cases[0].detail.as_deref(), Some("rustc not found in PATH"));
        assert_eq!(cases[1].kind, Some(FailureKind::ToolMissing));
        assert_eq!(cases[2].kind, Some(FailureKind::ToolMissing));
        assert_eq!(cases[3].kind, Some(FailureKind::CheckFailed));
        assert_eq!(tools.calls().len(), 3);
    }

    #[test]
    fn wasm_target_must_be_listed_exactly() {
        let cfg = test_config();
        let tools = ScriptedTools::new().on(
            "rustup target list --installed",
            ToolOutput::ok("wasm32-unknown-unknown-extra\n"),
        );
        let http = ScriptedHttp::new();
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(Path::new("/work"), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        check_wasm_target(&mut ctx);

        let case = &ctx.ledger.cases()[0];
        assert_eq!(case.result, TestResult::Fail);
        assert!(
            case.detail
                .as_deref()
                .is_some_and(|d| d.contains("rustup target add wasm32-unknown-unknown"))
        );
    }
}
