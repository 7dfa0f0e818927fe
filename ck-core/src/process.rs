//! Process liveness and termination for the per-role singleton
//!
//! Mutual exclusion is best effort: the newest actor terminates whatever pid the lock
//! names and then records its own. Checking and recording are not atomic.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::data::{ProcessLock, Role, StateStore};
use crate::error::{ChargeKeeperError, Result};

/// Seam over signals so lock handling can be tested without real processes
pub trait ProcessControl {
    fn is_alive(&self, pid: u32) -> bool;
    /// Ask the process to exit; does not wait for it
    fn terminate(&self, pid: u32) -> Result<()>;
    fn current_pid(&self) -> u32;
}

/// Real processes, via `kill(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

impl ProcessControl for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(pid) = to_pid(pid) else { return false };
        // Signal 0 only checks existence; EPERM still means the pid is taken.
        match signal::kill(pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let raw = to_pid(pid).ok_or_else(|| ChargeKeeperError::process(format!("invalid PID {pid}")))?;
        match signal::kill(raw, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ChargeKeeperError::process(format!("failed to signal PID {pid}: {e}"))),
        }
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

/// Terminate the live holder of `role` and drop its lock
///
/// A lock naming a dead process is treated as absent. Returns the pid that was
/// signalled, if any. Never signals the calling process.
pub fn preempt(
    store: &dyn StateStore,
    procs: &dyn ProcessControl,
    role: Role,
) -> Result<Option<u32>> {
    let Some(ProcessLock { pid, .. }) = store.load_lock(role)? else {
        return Ok(None);
    };

    if pid == procs.current_pid() {
        return Ok(None);
    }

    if !procs.is_alive(pid) {
        debug!("Removing stale {} lock for dead PID {}", role, pid);
        store.release_lock(role)?;
        return Ok(None);
    }

    info!("Stopping previous {} process (PID {})", role, pid);
    if let Err(e) = procs.terminate(pid) {
        warn!("{}", e);
    }
    store.release_lock(role)?;
    Ok(Some(pid))
}

/// Preempt the current holder, then record `pid` as the new one
pub fn take_over(
    store: &dyn StateStore,
    procs: &dyn ProcessControl,
    role: Role,
    pid: u32,
) -> Result<Option<u32>> {
    let previous = preempt(store, procs, role)?;
    store.acquire_lock(role, pid)?;
    Ok(previous)
}

/// In-memory process table for tests of lock handling
#[cfg(any(test, feature = "test-utils"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Process table where terminate removes the pid immediately
    #[derive(Debug)]
    pub struct FakeProcesses {
        pub me: u32,
        pub alive: Mutex<HashSet<u32>>,
        pub terminated: Mutex<Vec<u32>>,
    }

    impl FakeProcesses {
        pub fn new(me: u32, alive: &[u32]) -> Self {
            Self {
                me,
                alive: Mutex::new(alive.iter().copied().collect()),
                terminated: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessControl for FakeProcesses {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().contains(&pid)
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            self.alive.lock().remove(&pid);
            self.terminated.lock().push(pid);
            Ok(())
        }

        fn current_pid(&self) -> u32 {
            self.me
        }
    }
}
