//! Phased integration-test orchestrator.
//!
//! Runs environment, build, runtime and integration checks against the project
//! in `--root`, writes `TEST_REPORT.md`, and exits 0 only when no check failed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use orchestrator::exit_codes;
use orchestrator::io::config::{DEFAULT_CONFIG_FILE, load_config, render_config};
use orchestrator::io::http::HttpClient;
use orchestrator::io::interrupt;
use orchestrator::io::managed::NodeSlot;
use orchestrator::io::tools::SystemToolRunner;
use orchestrator::logging;
use orchestrator::phases::RunContext;
use orchestrator::run::run_all;

#[derive(Parser, Debug)]
#[command(
    name = "orchestrator",
    version,
    about = "Build, boot and exercise the node and its contracts, then report"
)]
struct Cli {
    /// Project root containing the node, runtime, contracts and deployer.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `orchestrator.toml` under the root).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report path, overriding the configured one.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("resolve project root {}", cli.root.display()))?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE));
    let mut config = load_config(&config_path)?;
    if let Some(report) = cli.report {
        config.report_path = report;
    }
    if cli.print_config {
        print!("{}", render_config(&config)?);
        return Ok(exit_codes::OK);
    }
    debug!(root = %root.display(), config = %config_path.display(), "starting run");

    let tools = SystemToolRunner::new(config.tool_timeout(), config.output_limit_bytes);
    let http = HttpClient::new(Duration::from_secs(config.environment.http_timeout_secs))?;
    let mut node = NodeSlot::new();
    interrupt::install(node.clone())?;
    let _teardown = node.guard();

    let ctx = RunContext::new(&root, &config, &tools, &http, &mut node)?;
    let outcome = run_all(ctx)?;
    Ok(outcome.exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["orchestrator"]);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(cli.config.is_none());
        assert!(cli.report.is_none());
        assert!(!cli.print_config);
    }

    #[test]
    fn parse_overrides() {
        let cli = Cli::parse_from([
            "orchestrator",
            "--root",
            "/work",
            "--config",
            "ci.toml",
            "--report",
            "out/REPORT.md",
            "--print-config",
        ]);
        assert_eq!(cli.root, PathBuf::from("/work"));
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        assert_eq!(cli.report, Some(PathBuf::from("out/REPORT.md")));
        assert!(cli.print_config);
    }
}
