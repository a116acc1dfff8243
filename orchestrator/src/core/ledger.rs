//! Append-only record of check outcomes.
//!
//! The ledger is the single source of truth for counts, the exit code and the
//! report table. Counters are a cache over the case sequence and are kept in
//! step with every append.

use serde::Serialize;
use tracing::debug;

use crate::core::types::{FailureKind, TestCase, TestResult};

/// Aggregate counters. Invariant: `total == passed + failed + skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Counts {
    /// Derive counters from a case sequence.
    pub fn from_cases(cases: &[TestCase]) -> Self {
        cases.iter().fold(Counts::default(), |mut counts, case| {
            counts.bump(case.result);
            counts
        })
    }

    fn bump(&mut self, result: TestResult) {
        self.total += 1;
        match result {
            TestResult::Pass => self.passed += 1,
            TestResult::Fail => self.failed += 1,
            TestResult::Skip => self.skipped += 1,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Immutable view of the ledger taken at report time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub cases: Vec<TestCase>,
    pub counts: Counts,
}

#[derive(Debug)]
pub struct ResultLedger {
    cases: Vec<TestCase>,
    counts: Counts,
    echo: bool,
}

impl Default for ResultLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultLedger {
    /// Ledger that echoes every recorded case to stdout.
    pub fn new() -> Self {
        Self {
            cases: Vec::new(),
            counts: Counts::default(),
            echo: true,
        }
    }

    /// Ledger without operator output.
    pub fn silent() -> Self {
        Self {
            echo: false,
            ..Self::new()
        }
    }

    /// Append a case. An empty `detail` is stored as `None`.
    pub fn record(
        &mut self,
        name: impl Into<String>,
        result: TestResult,
        kind: Option<FailureKind>,
        detail: impl Into<String>,
    ) -> &TestCase {
        let detail = detail.into();
        let case = TestCase {
            index: self.cases.len() + 1,
            name: name.into(),
            result,
            kind,
            detail: (!detail.trim().is_empty()).then_some(detail),
        };
        debug!(index = case.index, name = %case.name, result = ?case.result, "check recorded");
        if self.echo {
            emit(&case);
        }
        self.counts.bump(result);
        self.cases.push(case);
        &self.cases[self.cases.len() - 1]
    }

    pub fn pass(&mut self, name: impl Into<String>, detail: impl Into<String>) -> &TestCase {
        self.record(name, TestResult::Pass, None, detail)
    }

    pub fn fail(
        &mut self,
        name: impl Into<String>,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> &TestCase {
        self.record(name, TestResult::Fail, Some(kind), detail)
    }

    pub fn skip(
        &mut self,
        name: impl Into<String>,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> &TestCase {
        self.record(name, TestResult::Skip, Some(kind), detail)
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Result of the most recent case with this name, if any.
    pub fn last_result(&self, name: &str) -> Option<TestResult> {
        self.cases
            .iter()
            .rev()
            .find(|case| case.name == name)
            .map(|case| case.result)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cases: self.cases.clone(),
            counts: self.counts,
        }
    }
}

fn emit(case: &TestCase) {
    match &case.detail {
        Some(detail) => println!("  {} {}: {}", case.result.marker(), case.name, detail),
        None => println!("  {} {}", case.result.marker(), case.name),
    }
}
