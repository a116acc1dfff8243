//! Lifecycle of the long-running node process.
//!
//! [`ManagedProcess`] owns the child and its log file. [`NodeSlot`] shares
//! the single per-run instance between the phase executor and the interrupt
//! watcher; whoever tears down first takes the process out of the slot, so the
//! stop sequence runs at most once.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::output::first_lines;
use crate::io::process::{Signal, is_process_alive, send_signal, spawn_logged};

const SPAWN_LOG_LINES: usize = 5;

/// How to launch the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub log_path: PathBuf,
    /// Delay before the single post-spawn liveness check.
    pub settle: Duration,
    /// Time allowed between the terminate signal and a forced kill.
    pub stop_grace: Duration,
}

/// The process could not be started or died within its settle window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnError {
    pub reason: String,
    /// First lines of the process log, if any were written.
    pub log_excerpt: String,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.log_excerpt.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.reason, self.log_excerpt)
        }
    }
}

impl std::error::Error for SpawnError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
}

#[derive(Debug)]
pub struct ManagedProcess {
    child: Option<Child>,
    pid: Option<u32>,
    log_path: PathBuf,
    stop_grace: Duration,
    state: ProcessState,
}

impl ManagedProcess {
    /// Spawn, wait out the settle delay, then check liveness once.
    pub fn start(launch: &NodeLaunch) -> Result<Self, SpawnError> {
        let mut process = Self::spawn(launch)?;
        settle(launch.settle);
        process.confirm_alive()?;
        Ok(process)
    }

    /// Spawn without waiting. The caller owns the settle delay and the
    /// follow-up [`ManagedProcess::confirm_alive`].
    #[instrument(skip_all, fields(program = %launch.program.display()))]
    pub fn spawn(launch: &NodeLaunch) -> Result<Self, SpawnError> {
        match spawn_logged(&launch.program, &launch.args, &launch.cwd, &launch.log_path) {
            Ok(child) => Ok(Self {
                pid: Some(child.id()),
                child: Some(child),
                log_path: launch.log_path.clone(),
                stop_grace: launch.stop_grace,
                state: ProcessState::Running,
            }),
            Err(err) => {
                if let Err(rm_err) = fs::remove_file(&launch.log_path)
                    && rm_err.kind() != io::ErrorKind::NotFound
                {
                    debug!(err = %rm_err, "failed to remove log after spawn error");
                }
                Err(SpawnError {
                    reason: format!("{err:#}"),
                    log_excerpt: String::new(),
                })
            }
        }
    }

    /// Post-settle liveness check. A dead process is stopped, its PID
    /// cleared, and the first log lines returned in the error.
    pub fn confirm_alive(&mut self) -> Result<(), SpawnError> {
        if self.is_alive() {
            info!(pid = ?self.pid, "process started");
            return Ok(());
        }
        let log_excerpt = fs::read_to_string(&self.log_path)
            .map(|log| first_lines(&log, SPAWN_LOG_LINES))
            .unwrap_or_default();
        warn!(pid = ?self.pid, "process exited during settle window");
        self.stop();
        self.pid = None;
        Err(SpawnError {
            reason: "Process exited during startup".to_string(),
            log_excerpt,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Non-blocking liveness probe. Reaps the child if it has exited.
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(?status, "process has exited");
                self.state = ProcessState::Stopped;
                false
            }
            Err(err) => {
                debug!(err = %err, "try_wait failed, probing pid");
                self.pid.is_some_and(is_process_alive)
            }
        }
    }

    /// Terminate gracefully, force-kill after the grace period, remove the log.
    ///
    /// Idempotent: a second call only re-attempts log removal.
    #[instrument(skip_all, fields(pid = ?self.pid))]
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!(?status, "process already exited"),
                _ => {
                    let pid = child.id();
                    if !send_signal(pid, Signal::Terminate) {
                        debug!(pid, "terminate signal not delivered");
                    }
                    match child.wait_timeout(self.stop_grace) {
                        Ok(Some(status)) => info!(?status, "process stopped gracefully"),
                        Ok(None) | Err(_) => {
                            warn!(pid, "process ignored terminate, killing");
                            if let Err(err) = child.kill() {
                                debug!(err = %err, "kill failed");
                            }
                            if let Err(err) = child.wait() {
                                debug!(err = %err, "wait after kill failed");
                            }
                        }
                    }
                }
            }
            self.state = ProcessState::Stopped;
        }
        self.remove_log();
    }

    fn remove_log(&self) {
        match fs::remove_file(&self.log_path) {
            Ok(()) => debug!(log = %self.log_path.display(), "log removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(log = %self.log_path.display(), err = %err, "failed to remove log"),
        }
    }
}

fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Node lifecycle as seen by the phase executor.
pub trait NodeControl {
    fn start(&mut self, launch: &NodeLaunch) -> Result<u32, SpawnError>;
    fn is_running(&mut self) -> bool;
    fn stop(&mut self);
}

/// Shared holder of the run's single managed process.
#[derive(Debug, Clone, Default)]
pub struct NodeSlot {
    inner: Arc<Mutex<Option<ManagedProcess>>>,
}

impl NodeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ManagedProcess>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop and drop the process if one is held. Safe to call repeatedly and
    /// when nothing was ever started.
    pub fn teardown(&self) {
        let taken = self.lock().take();
        match taken {
            Some(mut process) => {
                info!(pid = ?process.pid(), "tearing down node");
                process.stop();
            }
            None => debug!("teardown: no node running"),
        }
    }

    /// Guard that tears the slot down when dropped.
    pub fn guard(&self) -> TeardownGuard {
        TeardownGuard { slot: self.clone() }
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().as_ref().and_then(ManagedProcess::pid)
    }
}

impl NodeControl for NodeSlot {
    /// The process sits in the slot from spawn onwards, so a teardown during
    /// the settle delay stops it.
    fn start(&mut self, launch: &NodeLaunch) -> Result<u32, SpawnError> {
        self.teardown();
        let process = ManagedProcess::spawn(launch)?;
        let pid = process.pid().unwrap_or_default();
        *self.lock() = Some(process);
        settle(launch.settle);

        let mut slot = self.lock();
        let confirmed = match slot.as_mut() {
            Some(process) => process.confirm_alive(),
            None => {
                warn!(pid, "node torn down during settle window");
                Err(SpawnError {
                    reason: "Process stopped during startup".to_string(),
                    log_excerpt: String::new(),
                })
            }
        };
        if confirmed.is_err() {
            *slot = None;
        }
        confirmed.map(|()| pid)
    }

    fn is_running(&mut self) -> bool {
        self.lock().as_mut().is_some_and(ManagedProcess::is_alive)
    }

    fn stop(&mut self) {
        self.teardown();
    }
}

/// Runs [`NodeSlot::teardown`] on drop, covering early returns and panics.
#[derive(Debug)]
pub struct TeardownGuard {
    slot: NodeSlot,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.slot.teardown();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn launch(dir: &Path, program: &str, args: &[&str]) -> NodeLaunch {
        NodeLaunch {
            program: PathBuf::from(program),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: dir.to_path_buf(),
            log_path: dir.join("logs/node.log"),
            settle: Duration::from_millis(100),
            stop_grace: Duration::from_secs(2),
        }
    }

    #[test]
    fn start_then_stop_removes_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = launch(temp.path(), "sleep", &["30"]);
        let mut process = ManagedProcess::start(&plan).expect("start");
        assert!(process.pid().is_some());
        assert!(process.is_alive());
        assert!(plan.log_path.exists());

        process.stop();
        assert!(!process.is_alive());
        assert_eq!(process.state(), ProcessState::Stopped);
        assert!(!plan.log_path.exists());
    }

    #[test]
    fn early_exit_is_spawn_error_with_log_excerpt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = launch(temp.path(), "sh", &["-c", "echo 'bind: address in use'; exit 1"]);
        let err = ManagedProcess::start(&plan).unwrap_err();
        assert!(err.reason.contains("exited during startup"));
        assert!(err.log_excerpt.contains("address in use"));
        assert!(!plan.log_path.exists());
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = launch(temp.path(), "/nonexistent/node-binary", &[]);
        let err = ManagedProcess::start(&plan).unwrap_err();
        assert!(err.to_string().contains("spawn"));
        assert!(!plan.log_path.exists());
    }

    #[test]
    fn stop_forces_kill_when_terminate_is_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut plan = launch(temp.path(), "sh", &["-c", "trap '' TERM; sleep 30"]);
        plan.stop_grace = Duration::from_millis(300);
        let mut process = ManagedProcess::start(&plan).expect("start");

        let started = Instant::now();
        process.stop();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!process.is_alive());
    }

    #[test]
    fn slot_teardown_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = launch(temp.path(), "sleep", &["30"]);
        let mut slot = NodeSlot::new();
        let pid = slot.start(&plan).expect("start");
        assert!(pid > 0);
        assert!(slot.is_running());

        slot.teardown();
        slot.teardown();
        assert!(!slot.is_running());
        assert!(!slot.is_occupied());
        assert!(!plan.log_path.exists());
    }

    #[test]
    fn teardown_during_settle_stops_the_node() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut plan = launch(temp.path(), "sleep", &["30"]);
        plan.settle = Duration::from_millis(800);
        let slot = NodeSlot::new();

        let starter = {
            let mut slot = slot.clone();
            let plan = plan.clone();
            thread::spawn(move || slot.start(&plan))
        };
        thread::sleep(Duration::from_millis(200));
        let pid = slot.pid().expect("node held in slot while settling");
        slot.teardown();

        let started = starter.join().expect("starter thread");
        assert!(started.unwrap_err().reason.contains("stopped during startup"));
        assert!(!is_process_alive(pid));
        assert!(!slot.is_occupied());
        assert!(!plan.log_path.exists());
    }

    #[test]
    fn teardown_without_start_is_noop() {
        let slot = NodeSlot::new();
        slot.teardown();
        assert!(!slot.is_occupied());
    }

    #[test]
    fn guard_tears_down_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = launch(temp.path(), "sleep", &["30"]);
        let mut slot = NodeSlot::new();
        {
            let _guard = slot.guard();
            slot.start(&plan).expect("start");
            assert!(slot.is_running());
        }
        assert!(!slot.is_occupied());
        assert!(!plan.log_path.exists());
    }
}
