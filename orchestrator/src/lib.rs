//! Phased integration-test orchestrator for a ledger node and its contracts.
//!
//! A run validates the toolchain, builds the node, runtime, contracts and
//! deployer, boots the node as a managed subprocess, waits for it to become
//! healthy and produce blocks, then drives an entitlement CRUD cycle against a
//! deployed contract. Every check lands in an append-only ledger that feeds
//! the markdown report and the exit code.
//!
//! - **[`core`]**: Pure, deterministic logic (ledger, verdicts, output decoding).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config, subprocesses, HTTP,
//!   signals, report files). Seams are traits so phases run against fakes.
//! - **[`phases`]** and [`run`]: sequencing, prerequisite gating and skip
//!   cascades.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod phases;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
