//! Phase 2: build binaries and contracts, then verify their artifacts.

use tracing::{debug, info, instrument};

use crate::core::output::first_lines;
use crate::core::types::{FailureKind, Prerequisite};
use crate::io::http::HttpProbe;
use crate::io::managed::NodeControl;
use crate::io::tools::{Invocation, ToolRunner};
use crate::phases::{Phase, RunContext, cargo_build};

#[instrument(skip_all)]
pub fn run<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    ctx.banner(Phase::Build);

    let node_package = ctx.config.node.package.clone();
    build_package(ctx, "Build node binary", &node_package);
    let runtime_package = ctx.config.runtime.package.clone();
    build_package(ctx, "Build runtime", &runtime_package);
    check_wasm_artifact(ctx);
    check_node_version(ctx);

    for name in ctx.config.contracts.names.clone() {
        let compiled = compile_contract(ctx, &name);
        check_contract_artifacts(ctx, &name, compiled);
    }
    info!(counts = ?ctx.ledger.counts(), "build phase done");
}

/// Returns whether the build succeeded.
pub(crate) fn build_package<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
    name: &str,
    package: &str,
) -> bool {
    let output = ctx.run_tool(cargo_build(package));
    if output.success() {
        ctx.ledger.pass(name, format!("cargo build --release -p {package}"));
        true
    } else {
        ctx.record_tool_failure(name, &output, "cargo");
        false
    }
}

fn check_wasm_artifact<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
) {
    const NAME: &str = "Runtime WASM artifact exists";
    let relative = ctx.config.runtime.wasm_artifact.clone();
    if ctx.path(&relative).is_file() {
        ctx.ledger.pass(NAME, relative.display().to_string());
    } else {
        ctx.ledger.fail(
            NAME,
            FailureKind::CheckFailed,
            format!("Missing {}", relative.display()),
        );
    }
}

fn check_node_version<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
) {
    const NAME: &str = "Node binary version";
    let binary = ctx.path(&ctx.config.node.binary);
    if !binary.is_file() {
        ctx.ledger.skip(
            NAME,
            FailureKind::UnmetPrerequisite,
            Prerequisite::NodeBinary.skip_reason(),
        );
        return;
    }
    let marker = ctx.config.node.version_marker.clone();
    let output = ctx.run_tool(Invocation::new(binary.display().to_string(), ["--version"]));
    if !output.success() {
        ctx.record_tool_failure(NAME, &output, "node");
    } else if output.stdout.contains(&marker) {
        ctx.ledger.pass(NAME, first_lines(&output.stdout, 1));
    } else {
        ctx.ledger.fail(
            NAME,
            FailureKind::CheckFailed,
            format!(
                "Version output lacks {marker:?}: {}",
                first_lines(&output.stdout, 1)
            ),
        );
    }
}

/// Returns whether compilation succeeded.
fn compile_contract<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
    name: &str,
) -> bool {
    let check = format!("Compile contract: {name}");
    let manifest = ctx
        .config
        .contracts
        .source_dir
        .join(name)
        .join("Cargo.toml");
    let output = ctx.run_tool(Invocation::new(
        "cargo",
        [
            "contract".to_string(),
            "build".to_string(),
            "--manifest-path".to_string(),
            manifest.display().to_string(),
            "--release".to_string(),
        ],
    ));
    if output.success() {
        ctx.ledger.pass(check, manifest.display().to_string());
        true
    } else {
        ctx.record_tool_failure(&check, &output, "cargo-contract");
        false
    }
}

fn check_contract_artifacts<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
    name: &str,
    compiled: bool,
) {
    let check = format!("Contract artifacts: {name}");
    if !compiled {
        ctx.ledger.skip(
            check,
            FailureKind::UnmetPrerequisite,
            Prerequisite::ContractCompiled.skip_reason(),
        );
        return;
    }
    let dir = ctx.path(&ctx.config.contracts.artifact_dir);
    let expected = [format!("{name}.contract"), format!("{name}.json")];
    let missing: Vec<&str> = expected
        .iter()
        .filter(|file| !dir.join(file.as_str()).is_file())
        .map(String::as_str)
        .collect();
    debug!(contract = name, ?missing, "artifact check");
    if missing.is_empty() {
        ctx.ledger.pass(check, expected.join(", "));
    } else {
        ctx.ledger.fail(
            check,
            FailureKind::CheckFailed,
            format!("Missing: {}", missing.join(", ")),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestResult;
    use crate::io::tools::ToolOutput;
    use crate::test_support::{FakeNode, ScriptedHttp, ScriptedTools, TestWorkspace, test_config};

    #[test]
    fn successful_build_with_artifacts() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.node_binary(&cfg);
        ws.runtime_wasm(&cfg);
        ws.contract_artifacts(&cfg, "access_registry");
        ws.contract_artifacts(&cfg, "attribute_store");
        let tools = ScriptedTools::new()
            .on("cargo build --release", ToolOutput::ok(""))
            .on("--version", ToolOutput::ok("node 1.0.0-dev\n"))
            .on("cargo contract build", ToolOutput::ok(""));
        let http = ScriptedHttp::new();
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let names: Vec<&str> = ctx.ledger.cases().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "Build node binary",
                "Build runtime",
                "Runtime WASM artifact exists",
                "Node binary version",
                "Compile contract: access_registry",
                "Contract artifacts: access_registry",
                "Compile contract: attribute_store",
                "Contract artifacts: attribute_store",
            ]
        );
        assert!(ctx.ledger.counts().all_passed());
        assert_eq!(ctx.ledger.counts().passed, 8);
    }

    #[test]
    fn failed_compile_skips_artifact_check() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        let tools = ScriptedTools::new()
            .on("cargo build --release", ToolOutput::failed(101, "error: could not compile"))
            .on("cargo contract build", ToolOutput::failed(1, "ERROR: build failed"));
        let http = ScriptedHttp::new();
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let cases = ctx.ledger.cases();
        assert_eq!(cases[0].kind, Some(FailureKind::CompileFailure));
        assert_eq!(cases[2].result, TestResult::Fail);
        assert_eq!(cases[3].name, "Node binary version");
        assert_eq!(cases[3].result, TestResult::Skip);
        assert_eq!(cases[3].detail.as_deref(), Some("Node binary not built"));
        for pair in cases[4..].chunks(2) {
            assert_eq!(pair[0].result, TestResult::Fail);
            assert_eq!(pair[1].result, TestResult::Skip);
            assert_eq!(pair[1].detail.as_deref(), Some("Compilation failed"));
        }
        assert!(
            !tools.calls().iter().any(|call| call.ends_with("--version")),
            "version probe must not run without a binary"
        );
    }

    #[test]
    fn compiled_but_missing_artifact_fails() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.write("target/ink/access_registry.contract", "{}");
        let tools = ScriptedTools::new().on("cargo contract build", ToolOutput::ok(""));
        let http = ScriptedHttp::new();
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        check_contract_artifacts(&mut ctx, "access_registry", true);

        let case = &ctx.ledger.cases()[0];
        assert_eq!(case.result, TestResult::Fail);
        assert_eq!(case.detail.as_deref(), Some("Missing: access_registry.json"));
    }

    #[test]
    fn version_without_marker_fails() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.node_binary(&cfg);
        let tools = ScriptedTools::new().on("--version", ToolOutput::ok("something-else 0.1\n"));
        let http = ScriptedHttp::new();
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        check_node_version(&mut ctx);

        let case = &ctx.ledger.cases()[0];
        assert_eq!(case.result, TestResult::Fail);
        assert_eq!(case.kind, Some(FailureKind::CheckFailed));
    }
}
