//! Orchestrator configuration stored in `orchestrator.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.toml";

/// Orchestrator configuration (TOML).
///
/// Every field has a default so a zero-argument run needs no file at all.
/// Relative paths resolve against the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Report artifact, overwritten every run.
    pub report_path: PathBuf,

    /// Upper bound for any single tool invocation (builds included).
    pub tool_timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,

    /// Lines of captured output kept in a check's detail.
    pub detail_lines: usize,

    pub environment: EnvironmentConfig,
    pub node: NodeConfig,
    pub runtime: RuntimeConfig,
    pub readiness: ReadinessConfig,
    pub contracts: ContractsConfig,
    pub deployer: DeployerConfig,
    pub crud: CrudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub wasm_target: String,
    /// Probed for reachability of the dependency source.
    pub dependency_url: String,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub package: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub log_path: PathBuf,
    /// Substring expected in `<binary> --version`.
    pub version_marker: String,
    pub rpc_url: String,
    pub ws_url: String,
    pub health_path: String,
    pub settle_secs: u64,
    pub stop_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub package: String,
    pub wasm_artifact: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub health_interval_secs: u64,
    pub health_attempts: u32,
    /// Wait between the two block-height samples.
    pub progress_settle_secs: u64,
    pub rpc_interval_secs: u64,
    pub rpc_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContractsConfig {
    pub names: Vec<String>,
    /// Directory holding one crate per contract (`<dir>/<name>/Cargo.toml`).
    pub source_dir: PathBuf,
    /// Shared output location of `<name>.contract` and `<name>.json`.
    pub artifact_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployerConfig {
    pub package: String,
    pub binary: PathBuf,
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CrudConfig {
    /// Contract exercised by the CRUD cycle; must be listed in `contracts.names`.
    pub contract: String,
    pub constructor: String,
    pub suri: String,
    /// Account whose entitlement is granted, queried and revoked.
    pub subject: String,
    /// Regexes recognizing the upstream compatibility error in deploy output.
    pub compat_error_patterns: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            wasm_target: "wasm32-unknown-unknown".to_string(),
            dependency_url: "https://index.crates.io/config.json".to_string(),
            http_timeout_secs: 10,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            package: "node".to_string(),
            binary: PathBuf::from("target/release/node"),
            args: vec!["--dev".to_string()],
            log_path: PathBuf::from("target/orchestrator/node.log"),
            version_marker: "node".to_string(),
            rpc_url: "http://127.0.0.1:9944".to_string(),
            ws_url: "ws://127.0.0.1:9944".to_string(),
            health_path: "/health".to_string(),
            settle_secs: 3,
            stop_grace_secs: 2,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            package: "runtime".to_string(),
            wasm_artifact: PathBuf::from(
                "target/release/wbuild/runtime/runtime.compact.compressed.wasm",
            ),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 1,
            health_attempts: 30,
            progress_settle_secs: 15,
            rpc_interval_secs: 1,
            rpc_attempts: 3,
        }
    }
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            names: vec!["access_registry".to_string(), "attribute_store".to_string()],
            source_dir: PathBuf::from("contracts"),
            artifact_dir: PathBuf::from("target/ink"),
        }
    }
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            package: "deployer".to_string(),
            binary: PathBuf::from("target/release/deployer"),
            account: "alice".to_string(),
        }
    }
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            contract: "access_registry".to_string(),
            constructor: "new".to_string(),
            suri: "//Alice".to_string(),
            subject: "0x0202020202020202020202020202020202020202".to_string(),
            compat_error_patterns: vec![
                r"Pallet not found: Revive".to_string(),
                r"(?i)(pallet[-_ ]?revive|revive pallet).*(not found|not available|unavailable)"
                    .to_string(),
            ],
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            report_path: PathBuf::from("TEST_REPORT.md"),
            tool_timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            detail_lines: 5,
            environment: EnvironmentConfig::default(),
            node: NodeConfig::default(),
            runtime: RuntimeConfig::default(),
            readiness: ReadinessConfig::default(),
            contracts: ContractsConfig::default(),
            deployer: DeployerConfig::default(),
            crud: CrudConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tool_timeout_secs == 0 {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.detail_lines == 0 {
            return Err(anyhow!("detail_lines must be > 0"));
        }
        if self.environment.http_timeout_secs == 0 {
            return Err(anyhow!("environment.http_timeout_secs must be > 0"));
        }
        if self.readiness.health_attempts == 0 {
            return Err(anyhow!("readiness.health_attempts must be > 0"));
        }
        if self.readiness.rpc_attempts == 0 {
            return Err(anyhow!("readiness.rpc_attempts must be > 0"));
        }
        if self.contracts.names.is_empty() {
            return Err(anyhow!("contracts.names must be a non-empty array"));
        }
        if !self.contracts.names.contains(&self.crud.contract) {
            return Err(anyhow!(
                "crud.contract {:?} must be listed in contracts.names",
                self.crud.contract
            ));
        }
        self.crud.compat_matchers()?;
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// `rpc_url` joined with the health path.
    pub fn health_url(&self) -> String {
        format!(
            "{}/{}",
            self.node.rpc_url.trim_end_matches('/'),
            self.node.health_path.trim_start_matches('/')
        )
    }
}

impl CrudConfig {
    pub fn compat_matchers(&self) -> Result<Vec<Regex>> {
        self.compat_error_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("invalid crud.compat_error_patterns entry {pattern:?}"))
            })
            .collect()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Render the effective config as TOML.
pub fn render_config(cfg: &OrchestratorConfig) -> Result<String> {
    toml::to_string_pretty(cfg).context("serialize config toml")
}
