//! Phase 4: deploy contracts and drive the entitlement CRUD cycle.

use tracing::{debug, info, instrument, warn};

use crate::core::entitlement::EntitlementLevel;
use crate::core::output::{call_succeeded, instantiated_address, returned_value, returns_token};
use crate::core::types::{FailureKind, Prerequisite};
use crate::io::http::HttpProbe;
use crate::io::managed::NodeControl;
use crate::io::tools::{Invocation, ToolOutput, ToolRunner};
use crate::phases::build::build_package;
use crate::phases::{Phase, RunContext};

pub const BUILD_DEPLOYER: &str = "Build deployer";
pub const DEPLOY_ALL: &str = "Deploy all contracts";
pub const CRUD_GRANT: &str = "CRUD: grant entitlement";
pub const CRUD_GET: &str = "CRUD: get entitlement";
pub const CRUD_HAS: &str = "CRUD: has entitlement";
pub const CRUD_REVOKE: &str = "CRUD: revoke entitlement";

/// Skip detail for the recognized upstream-compatibility signature.
pub const COMPAT_SKIP: &str = "pallet-revive not available on node (upstream compatibility)";

const GRANTED: EntitlementLevel = EntitlementLevel::Premium;
const QUERIED: EntitlementLevel = EntitlementLevel::Basic;

pub fn crud_deploy_name(contract: &str) -> String {
    format!("CRUD: deploy {contract}")
}

#[instrument(skip_all)]
pub fn run<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    ctx.banner(Phase::Integration);
    let package = ctx.config.deployer.package.clone();
    build_package(ctx, BUILD_DEPLOYER, &package);
    deploy_all(ctx);
    crud_cycle(ctx);
    info!(counts = ?ctx.ledger.counts(), "integration phase done");
}

/// First unmet node prerequisite, re-probing liveness.
fn node_gate<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
) -> Option<Prerequisite> {
    if !ctx.node_running() {
        Some(Prerequisite::NodeRunning)
    } else if !ctx.node_ready {
        Some(Prerequisite::NodeReady)
    } else {
        None
    }
}

fn deploy_all<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    let deployer = ctx.path(&ctx.config.deployer.binary);
    let gate = if deployer.is_file() {
        node_gate(ctx)
    } else {
        Some(Prerequisite::DeployerBinary)
    };
    if let Some(missing) = gate {
        ctx.ledger
            .skip(DEPLOY_ALL, FailureKind::UnmetPrerequisite, missing.skip_reason());
        return;
    }

    let output = ctx.run_tool(Invocation::new(
        deployer.display().to_string(),
        [
            "--url".to_string(),
            ctx.config.node.ws_url.clone(),
            "--account".to_string(),
            ctx.config.deployer.account.clone(),
        ],
    ));
    if ctx.is_compat_error(&output.combined()) {
        warn!("deployer hit upstream compatibility error");
        ctx.ledger
            .skip(DEPLOY_ALL, FailureKind::KnownUpstreamLimitation, COMPAT_SKIP);
    } else if output.success() {
        let detail = ctx.detail(&output.stdout);
        ctx.ledger.pass(DEPLOY_ALL, detail);
    } else {
        ctx.record_tool_failure(DEPLOY_ALL, &output, "deployer");
    }
}

/// Checks recorded after the deploy step, in order.
const DEPENDENT_STEPS: [&str; 4] = [CRUD_GRANT, CRUD_GET, CRUD_HAS, CRUD_REVOKE];

/// Outcome of one contract-call step.
enum Step {
    Passed(String),
    Failed(FailureKind, String),
    Incompatible,
}

fn crud_cycle<T: ToolRunner, H: HttpProbe, N: NodeControl>(ctx: &mut RunContext<'_, T, H, N>) {
    let contract = ctx.config.crud.contract.clone();
    let deploy_name = crud_deploy_name(&contract);
    let artifact = ctx
        .path(&ctx.config.contracts.artifact_dir)
        .join(format!("{contract}.contract"));

    let gate = if artifact.is_file() {
        node_gate(ctx)
    } else {
        Some(Prerequisite::ContractArtifact)
    };
    if let Some(missing) = gate {
        debug!(?missing, "CRUD cycle gated");
        ctx.ledger
            .skip(&deploy_name, FailureKind::UnmetPrerequisite, missing.skip_reason());
        skip_dependents(ctx, FailureKind::UnmetPrerequisite, missing.skip_reason());
        return;
    }

    let crud = &ctx.config.crud;
    let mut args = vec![
        "contract".to_string(),
        "instantiate".to_string(),
        artifact.display().to_string(),
        "--constructor".to_string(),
        crud.constructor.clone(),
    ];
    args.extend(signer_args(ctx));
    args.extend(["--execute", "--skip-confirm", "--output-json"].map(String::from));
    let output = ctx.run_tool(Invocation::new("cargo", args));

    let address = if ctx.is_compat_error(&output.combined()) {
        warn!("instantiate hit upstream compatibility error");
        ctx.ledger
            .skip(&deploy_name, FailureKind::KnownUpstreamLimitation, COMPAT_SKIP);
        skip_dependents(ctx, FailureKind::KnownUpstreamLimitation, COMPAT_SKIP);
        return;
    } else if !output.success() {
        ctx.record_tool_failure(&deploy_name, &output, "cargo-contract");
        None
    } else {
        let address = instantiated_address(&output.stdout);
        if address.is_none() {
            let detail = format!("No contract address in output: {}", ctx.detail(&output.stdout));
            ctx.ledger.fail(&deploy_name, FailureKind::CheckFailed, detail);
        }
        address
    };
    let Some(address) = address else {
        skip_dependents(
            ctx,
            FailureKind::UnmetPrerequisite,
            Prerequisite::DeploySucceeded.skip_reason(),
        );
        return;
    };
    ctx.ledger.pass(&deploy_name, format!("Deployed at {address}"));

    let grant = grant_step(ctx, &address);
    record_step(ctx, CRUD_GRANT, grant);
    let get = get_step(ctx, &address);
    record_step(ctx, CRUD_GET, get);
    let has = has_step(ctx, &address);
    record_step(ctx, CRUD_HAS, has);
    let revoke = revoke_step(ctx, &address);
    record_step(ctx, CRUD_REVOKE, revoke);
}

fn skip_dependents<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
    kind: FailureKind,
    reason: &str,
) {
    for name in DEPENDENT_STEPS {
        ctx.ledger.skip(name, kind, reason);
    }
}

fn record_step<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &mut RunContext<'_, T, H, N>,
    name: &str,
    step: Step,
) {
    match step {
        Step::Passed(detail) => {
            ctx.ledger.pass(name, detail);
        }
        Step::Failed(kind, detail) => {
            ctx.ledger.fail(name, kind, detail);
        }
        Step::Incompatible => {
            ctx.ledger
                .skip(name, FailureKind::KnownUpstreamLimitation, COMPAT_SKIP);
        }
    }
}

fn signer_args<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
) -> Vec<String> {
    vec![
        "--suri".to_string(),
        ctx.config.crud.suri.clone(),
        "--url".to_string(),
        ctx.config.node.ws_url.clone(),
    ]
}

/// Invoke a contract message. State-changing calls pass `execute`.
fn call<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
    address: &str,
    message: &str,
    message_args: &[&str],
    execute: bool,
) -> ToolOutput {
    let mut args = vec![
        "contract".to_string(),
        "call".to_string(),
        "--contract".to_string(),
        address.to_string(),
        "--message".to_string(),
        message.to_string(),
    ];
    if !message_args.is_empty() {
        args.push("--args".to_string());
        args.extend(message_args.iter().map(|arg| arg.to_string()));
    }
    args.extend(signer_args(ctx));
    if execute {
        args.extend(["--execute", "--skip-confirm"].map(String::from));
    }
    args.push("--output-json".to_string());
    ctx.run_tool(Invocation::new("cargo", args))
}

/// Common screening of a call result before step-specific checks.
fn screen<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
    output: &ToolOutput,
) -> Option<Step> {
    if ctx.is_compat_error(&output.combined()) {
        return Some(Step::Incompatible);
    }
    if !output.success() {
        let (kind, detail) = ctx.tool_failure(output, "cargo-contract");
        return Some(Step::Failed(kind, detail));
    }
    None
}

fn grant_step<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
    address: &str,
) -> Step {
    let subject = ctx.config.crud.subject.as_str();
    let output = call(ctx, address, "grant_entitlement", &[subject, GRANTED.as_arg()], true);
    if let Some(step) = screen(ctx, &output) {
        return step;
    }
    if call_succeeded(&output.stdout) {
        Step::Passed(format!("Granted {GRANTED}"))
    } else {
        Step::Failed(
            FailureKind::CheckFailed,
            format!("Call did not report success: {}", ctx.detail(&output.stdout)),
        )
    }
}

/// Dry-run a query and expect `token` in the returned value.
fn expect_value<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
    output: &ToolOutput,
    token: &str,
) -> Step {
    if let Some(step) = screen(ctx, output) {
        return step;
    }
    if returns_token(&output.stdout, token) {
        Step::Passed(format!("Returned {token}"))
    } else {
        Step::Failed(
            FailureKind::CheckFailed,
            format!(
                "Expected {token}, got {}",
                ctx.detail(&returned_value(&output.stdout))
            ),
        )
    }
}

fn get_step<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
    address: &str,
) -> Step {
    let subject = ctx.config.crud.subject.as_str();
    let output = call(ctx, address, "get_entitlement", &[subject], false);
    expect_value(ctx, &output, GRANTED.as_arg())
}

fn has_step<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
    address: &str,
) -> Step {
    let subject = ctx.config.crud.subject.as_str();
    let expected = GRANTED.satisfies(QUERIED).to_string();
    let output = call(ctx, address, "has_entitlement", &[subject, QUERIED.as_arg()], false);
    expect_value(ctx, &output, &expected)
}

fn revoke_step<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    ctx: &RunContext<'_, T, H, N>,
    address: &str,
) -> Step {
    let subject = ctx.config.crud.subject.as_str();
    let output = call(ctx, address, "revoke_entitlement", &[subject], true);
    if let Some(step) = screen(ctx, &output) {
        return step;
    }
    if !call_succeeded(&output.stdout) {
        return Step::Failed(
            FailureKind::CheckFailed,
            format!("Call did not report success: {}", ctx.detail(&output.stdout)),
        );
    }

    let cleared = EntitlementLevel::None.as_arg();
    let requery = call(ctx, address, "get_entitlement", &[subject], false);
    if let Some(step) = screen(ctx, &requery) {
        return step;
    }
    if returns_token(&requery.stdout, cleared) {
        Step::Passed("Entitlement cleared".to_string())
    } else {
        Step::Failed(
            FailureKind::CheckFailed,
            format!(
                "Entitlement not cleared (still {})",
                ctx.detail(&returned_value(&requery.stdout))
            ),
        )
    }
}
