//! Orchestration of a complete run: four check phases, then cleanup and
//! reporting.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::ledger::Counts;
use crate::core::types::TestCase;
use crate::exit_codes;
use crate::io::http::HttpProbe;
use crate::io::managed::NodeControl;
use crate::io::report::{EnvironmentFacts, render_report, write_report};
use crate::io::tools::ToolRunner;
use crate::phases::{Phase, RunContext, build, environment, integration, runtime};

/// Result of a completed (non-interrupted) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub cases: Vec<TestCase>,
    pub counts: Counts,
    pub exit_code: i32,
    pub report_path: PathBuf,
}

/// Execute every phase in order.
///
/// Check failures are recorded, never returned. An `Err` means the report
/// could not be produced; the node is stopped before the report is attempted.
#[instrument(skip_all, fields(root = %ctx.root.display()))]
pub fn run_all<T: ToolRunner, H: HttpProbe, N: NodeControl>(
    mut ctx: RunContext<'_, T, H, N>,
) -> Result<RunOutcome> {
    environment::run(&mut ctx);
    build::run(&mut ctx);
    runtime::run(&mut ctx);
    integration::run(&mut ctx);

    ctx.banner(Phase::Reporting);
    ctx.stop_node();

    let snapshot = ctx.ledger.snapshot();
    let env = EnvironmentFacts::collect(ctx.tools, ctx.root, ctx.config);
    let report = render_report(&snapshot, &env)?;
    let report_path = ctx.path(&ctx.config.report_path);
    write_report(&report_path, &report)?;

    let counts = snapshot.counts;
    let exit_code = exit_codes::for_counts(&counts);
    if ctx.echo {
        print_summary(&counts, &report_path);
    }
    info!(?counts, exit_code, "run complete");
    Ok(RunOutcome {
        cases: snapshot.cases,
        counts,
        exit_code,
        report_path,
    })
}

fn print_summary(counts: &Counts, report_path: &std::path::Path) {
    println!();
    println!(
        "Total: {}  Passed: {}  Failed: {}  Skipped: {}",
        counts.total, counts.passed, counts.failed, counts.skipped
    );
    if counts.all_passed() {
        println!("All executed checks passed.");
    } else {
        println!("{} check(s) failed.", counts.failed);
    }
    println!("Report: {}", report_path.display());
}
