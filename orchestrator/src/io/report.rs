//! Markdown report rendering and persistence.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::ledger::{Counts, LedgerSnapshot};
use crate::core::types::{FailureKind, TestCase, TestResult};
use crate::io::config::OrchestratorConfig;
use crate::io::tools::{Invocation, ToolRunner};

const REPORT_TEMPLATE: &str = include_str!("templates/report.md");

pub const NOT_AVAILABLE: &str = "Not available";

/// Facts about the machine the run happened on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentFacts {
    pub generated_at: String,
    pub platform: String,
    pub working_dir: String,
    pub rustc: String,
    pub cargo: String,
    pub cargo_contract: String,
    pub node: String,
}

impl EnvironmentFacts {
    /// Probe tool versions. Never fails; unknown values read "Not available".
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn collect<T: ToolRunner>(tools: &T, root: &Path, cfg: &OrchestratorConfig) -> Self {
        let node_binary = root.join(&cfg.node.binary);
        let node = if node_binary.is_file() {
            probe_version(
                tools,
                &Invocation::new(node_binary.display().to_string(), ["--version"]).in_dir(root),
            )
        } else {
            NOT_AVAILABLE.to_string()
        };
        Self {
            generated_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            working_dir: root.display().to_string(),
            rustc: probe_version(tools, &Invocation::new("rustc", ["--version"])),
            cargo: probe_version(tools, &Invocation::new("cargo", ["--version"])),
            cargo_contract: probe_version(tools, &Invocation::new("cargo", ["contract", "--version"])),
            node,
        }
    }
}

fn probe_version<T: ToolRunner>(tools: &T, invocation: &Invocation) -> String {
    let output = tools.run(invocation);
    let line = output.stdout.lines().map(str::trim).find(|line| !line.is_empty());
    match line {
        Some(line) if output.success() => line.to_string(),
        _ => {
            debug!(command = %invocation.display(), "version probe unavailable");
            NOT_AVAILABLE.to_string()
        }
    }
}

#[derive(Debug, Serialize)]
struct Row {
    index: usize,
    name: String,
    badge: String,
    detail: String,
}

impl Row {
    fn from_case(case: &TestCase) -> Self {
        Self {
            index: case.index,
            name: escape_cell(&case.name),
            badge: format!("{} {}", case.result.icon(), case.result.label()),
            detail: case
                .detail
                .as_deref()
                .map(escape_cell)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct KindEntry {
    kind: &'static str,
    failed: usize,
    skipped: usize,
}

/// Keep table cells on one line and out of the column separators.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn breakdown(cases: &[TestCase]) -> Vec<KindEntry> {
    let mut by_kind: BTreeMap<FailureKind, KindEntry> = BTreeMap::new();
    for case in cases.iter().filter(|case| case.result != TestResult::Pass) {
        let Some(kind) = case.kind else {
            continue;
        };
        let entry = by_kind.entry(kind).or_insert_with(|| KindEntry {
            kind: kind.describe(),
            ..KindEntry::default()
        });
        match case.result {
            TestResult::Fail => entry.failed += 1,
            TestResult::Skip => entry.skipped += 1,
            TestResult::Pass => {}
        }
    }
    by_kind.into_values().collect()
}

fn verdict(counts: &Counts) -> String {
    if counts.all_passed() {
        format!(
            "✅ **All executed checks passed** ({} skipped)",
            counts.skipped
        )
    } else {
        format!(
            "❌ **{} of {} checks failed**",
            counts.failed, counts.total
        )
    }
}

/// Render the report. Output depends only on the inputs.
pub fn render_report(snapshot: &LedgerSnapshot, env: &EnvironmentFacts) -> Result<String> {
    let mut engine = Environment::new();
    engine.set_trim_blocks(true);
    engine.set_lstrip_blocks(true);
    engine
        .add_template("report.md", REPORT_TEMPLATE)
        .context("load report template")?;
    let template = engine.get_template("report.md")?;

    let rows: Vec<Row> = snapshot.cases.iter().map(Row::from_case).collect();
    let rendered = template
        .render(context! {
            env => env,
            counts => snapshot.counts,
            verdict => verdict(&snapshot.counts),
            rows => rows,
            breakdown => breakdown(&snapshot.cases),
        })
        .context("render report")?;
    Ok(rendered)
}

/// Replace the report at `path` (temp file + rename).
#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_report(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    debug!(bytes = contents.len(), "report written");
    Ok(())
}
