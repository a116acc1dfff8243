//! External-interruption watcher.
//!
//! Signals are registered once, before any phase runs, on a small
//! current-thread tokio runtime that lives on its own thread. On delivery the
//! watcher tears down the shared node slot and exits the process; the report
//! is not written for interrupted runs.

use std::process;
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::exit_codes;
use crate::io::managed::NodeSlot;

/// Which interruption ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Interrupt,
    Terminate,
    Hangup,
}

impl Interruption {
    pub fn name(self) -> &'static str {
        match self {
            Interruption::Interrupt => "SIGINT",
            Interruption::Terminate => "SIGTERM",
            Interruption::Hangup => "SIGHUP",
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Interruption::Interrupt => exit_codes::INTERRUPTED,
            Interruption::Terminate => exit_codes::TERMINATED,
            Interruption::Hangup => exit_codes::HANGUP,
        }
    }
}

#[cfg(unix)]
struct Watcher {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Watcher {
    /// Must be called inside a runtime context.
    fn register() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("register SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("register SIGTERM handler")?,
            hangup: signal(SignalKind::hangup()).context("register SIGHUP handler")?,
        })
    }

    async fn recv(mut self) -> Interruption {
        tokio::select! {
            _ = self.interrupt.recv() => Interruption::Interrupt,
            _ = self.terminate.recv() => Interruption::Terminate,
            _ = self.hangup.recv() => Interruption::Hangup,
        }
    }
}

#[cfg(not(unix))]
struct Watcher;

#[cfg(not(unix))]
impl Watcher {
    fn register() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> Interruption {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(err = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
        Interruption::Interrupt
    }
}

/// Start the watcher thread. Teardown goes through `slot`, so it is shared
/// with (and idempotent against) the normal end-of-run teardown.
pub fn install(slot: NodeSlot) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    let watcher = {
        let _enter = runtime.enter();
        Watcher::register()?
    };

    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            let received = runtime.block_on(watcher.recv());
            warn!(signal = received.name(), "interrupted, tearing down node");
            slot.teardown();
            eprintln!("\nInterrupted ({}); node stopped.", received.name());
            process::exit(received.exit_code());
        })
        .context("spawn interrupt watcher")?;
    debug!("interrupt watcher installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(Interruption::Interrupt.exit_code(), 130);
        assert_eq!(Interruption::Terminate.exit_code(), 143);
        assert_eq!(Interruption::Hangup.exit_code(), 129);
    }

    #[test]
    fn install_succeeds_without_a_node() {
        install(NodeSlot::new()).expect("install watcher");
    }
}
