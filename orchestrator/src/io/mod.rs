//! Side-effecting collaborators: configuration, subprocesses, HTTP, signals
//! and report persistence.

pub mod config;
pub mod http;
pub mod interrupt;
pub mod managed;
pub mod poller;
pub mod process;
pub mod report;
pub mod tools;
