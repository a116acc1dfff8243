//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod entitlement;
pub mod hex;
pub mod ledger;
pub mod output;
pub mod progress;
pub mod types;
