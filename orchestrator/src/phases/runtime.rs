//! Phase 3: boot the node and watch it become healthy and produce blocks.

use std::thread;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::progress::classify_progress;
use crate::core::types::{FailureKind, Prerequisite};
use crate::io::http::{HttpProbe, is_healthy, read_block_height};
use crate::io::managed::{NodeControl, NodeLaunch};
use crate::io::poller::{PollConfig, PollOutcome, poll_until, poll_value};
use crate::io::tools::ToolRunner;
use crate::phases::{Phase, RunContext};

pub const START_NODE: &str = "Start node";
pub const HEALTH_CHECK: &str = "Node health check";
pub const BLOCK_PRODUCTION: &str = "Block production";

#[instrument(skip_all)]
pub fn run<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    ctx.banner(Phase::Runtime);
    start_node(ctx);
    check_health(ctx);
    check_block_production(ctx);
    info!(node_ready = ctx.node_ready, "runtime phase done");
}

fn node_launch<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
) -> NodeLaunch {
    let node = &ctx.config.node;
    NodeLaunch {
        program: ctx.path(&node.binary),
        args: node.args.clone(),
        cwd: ctx.root.to_path_buf(),
        log_path: ctx.path(&node.log_path),
        settle: Duration::from_secs(node.settle_secs),
        stop_grace: Duration::from_secs(node.stop_grace_secs),
    }
}

fn start_node<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    let launch = node_launch(ctx);
    if !launch.program.is_file() {
        ctx.ledger.skip(
            START_NODE,
            FailureKind::UnmetPrerequisite,
            Prerequisite::NodeBinary.skip_reason(),
        );
        return;
    }
    match ctx.node.start(&launch) {
        Ok(pid) => {
            ctx.ledger.pass(START_NODE, format!("PID {pid}"));
        }
        Err(err) => {
            warn!(err = %err, "node failed to start");
            let detail = ctx.detail(&err.to_string());
            ctx.ledger.fail(START_NODE, FailureKind::SpawnFailure, detail);
        }
    }
}

fn check_health<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    if !ctx.node_running() {
        ctx.ledger.skip(
            HEALTH_CHECK,
            FailureKind::UnmetPrerequisite,
            Prerequisite::NodeRunning.skip_reason(),
        );
        return;
    }
    let readiness = &ctx.config.readiness;
    let config = PollConfig::new(
        Duration::from_secs(readiness.health_interval_secs),
        readiness.health_attempts,
    );
    let url = ctx.config.health_url();
    let http = ctx.http;
    match poll_until(config, || is_healthy(http, &url)) {
        PollOutcome::Ready { attempts } => {
            ctx.node_ready = true;
            ctx.ledger
                .pass(HEALTH_CHECK, format!("Healthy after {attempts} attempt(s)"));
        }
        PollOutcome::TimedOut { attempts } => {
            warn!(attempts, "node never became healthy, stopping it");
            ctx.ledger.fail(
                HEALTH_CHECK,
                FailureKind::Timeout,
                format!(
                    "Timeout after {attempts} attempts waiting for {}",
                    ctx.config.node.health_path
                ),
            );
            ctx.stop_node();
        }
    }
}

fn check_block_production<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
) {
    if !ctx.node_ready {
        ctx.ledger.skip(
            BLOCK_PRODUCTION,
            FailureKind::UnmetPrerequisite,
            Prerequisite::NodeReady.skip_reason(),
        );
        return;
    }
    let readiness = &ctx.config.readiness;
    let config = PollConfig::new(
        Duration::from_secs(readiness.rpc_interval_secs),
        readiness.rpc_attempts,
    );
    let settle = Duration::from_secs(readiness.progress_settle_secs);
    let rpc_url = ctx.config.node.rpc_url.clone();
    let http = ctx.http;

    let (first, _) = poll_value(config, || read_block_height(http, &rpc_url));
    let second = match first {
        Some(_) => {
            if !settle.is_zero() {
                thread::sleep(settle);
            }
            poll_value(config, || read_block_height(http, &rpc_url)).0
        }
        None => None,
    };

    let verdict = classify_progress(first, second);
    if verdict.is_regression() {
        warn!(?first, ?second, "block height decreased between samples");
    }
    if verdict.is_progress() {
        ctx.ledger.pass(BLOCK_PRODUCTION, verdict.detail());
    } else {
        ctx.ledger
            .fail(BLOCK_PRODUCTION, FailureKind::CheckFailed, verdict.detail());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestResult;
    use crate::io::managed::SpawnError;
    use crate::test_support::{FakeNode, ScriptedHttp, ScriptedTools, TestWorkspace, test_config};

    fn results(ctx: &RunContext<'_, ScriptedTools, ScriptedHttp, FakeNode>) -> Vec<TestResult> {
        ctx.ledger.cases().iter().map(|case| case.result).collect()
    }

    #[test]
    fn healthy_node_producing_blocks() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.node_binary(&cfg);
        let tools = ScriptedTools::new();
        let http = ScriptedHttp::new()
            .health([503, 503, 200])
            .heights([Some(4), Some(9)]);
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        assert_eq!(results(&ctx), [TestResult::Pass; 3]);
        let cases = ctx.ledger.cases();
        assert_eq!(cases[1].detail.as_deref(), Some("Healthy after 3 attempt(s)"));
        assert_eq!(cases[2].detail.as_deref(), Some("Block height 4 -> 9"));
        assert!(ctx.node_ready);
        drop(ctx);
        assert_eq!(node.starts(), 1);
        assert_eq!(node.stops(), 0);
    }

    #[test]
    fn missing_binary_cascades_without_probing() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        let tools = ScriptedTools::new();
        let http = ScriptedHttp::new().health([200]);
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        assert_eq!(results(&ctx), [TestResult::Skip; 3]);
        let details: Vec<_> = ctx
            .ledger
            .cases()
            .iter()
            .map(|case| case.detail.clone().unwrap_or_default())
            .collect();
        assert_eq!(
            details,
            ["Node binary not built", "Node not running", "Node not ready"]
        );
        drop(ctx);
        assert_eq!(node.starts(), 0);
        assert_eq!(http.health_calls(), 0);
        assert_eq!(http.rpc_calls(), 0);
    }

    #[test]
    fn spawn_failure_is_recorded_with_log_excerpt() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.node_binary(&cfg);
        let tools = ScriptedTools::new();
        let http = ScriptedHttp::new();
        let mut node = FakeNode::failing(SpawnError {
            reason: "Process exited during startup".to_string(),
            log_excerpt: "Error: address already in use".to_string(),
        });
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let cases = ctx.ledger.cases();
        assert_eq!(cases[0].kind, Some(FailureKind::SpawnFailure));
        assert!(
            cases[0]
                .detail
                .as_deref()
                .is_some_and(|d| d.contains("address already in use"))
        );
        assert_eq!(cases[1].detail.as_deref(), Some("Node not running"));
        assert_eq!(cases[2].detail.as_deref(), Some("Node not ready"));
        drop(ctx);
        assert_eq!(http.health_calls(), 0);
    }

    #[test]
    fn health_timeout_stops_node() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.node_binary(&cfg);
        let tools = ScriptedTools::new();
        let http = ScriptedHttp::new();
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let cases = ctx.ledger.cases();
        assert_eq!(cases[1].result, TestResult::Fail);
        assert_eq!(cases[1].kind, Some(FailureKind::Timeout));
        assert_eq!(
            cases[1].detail.as_deref(),
            Some("Timeout after 30 attempts waiting for /health")
        );
        assert_eq!(cases[2].detail.as_deref(), Some("Node not ready"));
        assert!(!ctx.node_running());
        drop(ctx);
        assert_eq!(http.health_calls(), 30);
        assert_eq!(node.stops(), 1);
    }

    #[test]
    fn stuck_height_fails_progress() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.node_binary(&cfg);
        let tools = ScriptedTools::new();
        let http = ScriptedHttp::new().health([200]).heights([Some(7), Some(7)]);
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let case = &ctx.ledger.cases()[2];
        assert_eq!(case.result, TestResult::Fail);
        assert_eq!(
            case.detail.as_deref(),
            Some("No new blocks produced (height stuck at 7)")
        );
    }

    #[test]
    fn unreadable_second_sample_fails_progress() {
        let cfg = test_config();
        let ws = TestWorkspace::new();
        ws.node_binary(&cfg);
        let tools = ScriptedTools::new();
        let http = ScriptedHttp::new().health([200]).heights([Some(7)]);
        let mut node = FakeNode::new();
        let mut ctx = RunContext::new(ws.root(), &cfg, &tools, &http, &mut node)
            .expect("context")
            .quiet();

        run(&mut ctx);

        let case = &ctx.ledger.cases()[2];
        assert_eq!(case.result, TestResult::Fail);
        assert_eq!(
            case.detail.as_deref(),
            Some("Could not read block height (second sample)")
        );
        drop(ctx);
        assert_eq!(http.rpc_calls(), 1 + 3);
    }
}
