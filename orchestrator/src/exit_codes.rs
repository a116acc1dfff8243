//! Stable exit codes for the orchestrator process.

use crate::core::ledger::Counts;

/// Every recorded check passed or was skipped.
pub const OK: i32 = 0;
/// At least one check failed, or the run aborted on a fatal error.
pub const FAILED: i32 = 1;
/// Interrupted by SIGHUP.
pub const HANGUP: i32 = 129;
/// Interrupted by SIGINT / Ctrl-C.
pub const INTERRUPTED: i32 = 130;
/// Interrupted by SIGTERM.
pub const TERMINATED: i32 = 143;

/// Exit code for a completed run.
pub fn for_counts(counts: &Counts) -> i32 {
    if counts.all_passed() { OK } else { FAILED }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_do_not_fail_the_run() {
        let counts = Counts {
            total: 3,
            passed: 1,
            failed: 0,
            skipped: 2,
        };
        assert_eq!(for_counts(&counts), OK);
    }

    #[test]
    fn any_failure_fails_the_run() {
        let counts = Counts {
            total: 3,
            passed: 2,
            failed: 1,
            skipped: 0,
        };
        assert_eq!(for_counts(&counts), FAILED);
    }
}
