//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between the phase executor, the result
//! ledger and the report generator. They must not depend on external state.

use serde::{Deserialize, Serialize};

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pass,
    Fail,
    /// The check was not attempted because a prerequisite was missing or a
    /// known environment limitation applies.
    Skip,
}

impl TestResult {
    /// Upper-case label used in the report table.
    pub fn label(self) -> &'static str {
        match self {
            TestResult::Pass => "PASS",
            TestResult::Fail => "FAIL",
            TestResult::Skip => "SKIP",
        }
    }

    /// Icon shown next to the label in the report.
    pub fn icon(self) -> &'static str {
        match self {
            TestResult::Pass => "✅",
            TestResult::Fail => "❌",
            TestResult::Skip => "⏭️",
        }
    }

    /// Single-character marker for live operator output.
    pub fn marker(self) -> &'static str {
        match self {
            TestResult::Pass => "✓",
            TestResult::Fail => "✗",
            TestResult::Skip => "⊘",
        }
    }
}

/// Why a check did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required executable is absent.
    ToolMissing,
    /// A build or compile invocation exited non-zero.
    CompileFailure,
    /// The managed process died within its settle window.
    SpawnFailure,
    /// A readiness/progress poll or a tool invocation exhausted its budget.
    Timeout,
    /// The probe ran but observed the wrong thing.
    CheckFailed,
    /// A gating condition was false before the check was attempted.
    UnmetPrerequisite,
    /// A recognized upstream error signature (environment mismatch).
    KnownUpstreamLimitation,
}

impl FailureKind {
    pub fn describe(self) -> &'static str {
        match self {
            FailureKind::ToolMissing => "tool missing",
            FailureKind::CompileFailure => "compile failure",
            FailureKind::SpawnFailure => "spawn failure",
            FailureKind::Timeout => "timeout",
            FailureKind::CheckFailed => "check failed",
            FailureKind::UnmetPrerequisite => "unmet prerequisite",
            FailureKind::KnownUpstreamLimitation => "known upstream limitation",
        }
    }
}

/// A single recorded check. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// 1-based ordinal in recording order.
    pub index: usize,
    pub name: String,
    pub result: TestResult,
    pub kind: Option<FailureKind>,
    pub detail: Option<String>,
}

/// Upstream conditions a check can be gated on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prerequisite {
    NodeBinary,
    NodeRunning,
    NodeReady,
    DeployerBinary,
    ContractCompiled,
    ContractArtifact,
    DeploySucceeded,
}

impl Prerequisite {
    /// Skip message naming the unmet prerequisite.
    pub fn skip_reason(&self) -> &'static str {
        match self {
            Prerequisite::NodeBinary => "Node binary not built",
            Prerequisite::NodeRunning => "Node not running",
            Prerequisite::NodeReady => "Node not ready",
            Prerequisite::DeployerBinary => "Deployer binary not built",
            Prerequisite::ContractCompiled => "Compilation failed",
            Prerequisite::ContractArtifact => "Contract not built",
            Prerequisite::DeploySucceeded => "Deploy failed",
        }
    }
}
