//! Closed table of privileged commands and how they are run
//!
//! The unprivileged daemon may only elevate the commands listed here. Each
//! [`PrivilegedOp`] maps to one exact argv, and the sudoers policy is rendered from
//! the same table, so the two can never drift apart.

use std::fmt;
use std::process::Command;

use tracing::debug;

use crate::constants::paths;
use crate::error::{ChargeKeeperError, Result};
use crate::hw::smc::RegisterWrite;

/// Everything the daemon may run as root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivilegedOp {
    Register(RegisterWrite),
    /// Unattended self-update
    UpdateSilent,
}

impl PrivilegedOp {
    /// Every entry, in policy order
    pub fn all() -> Vec<PrivilegedOp> {
        RegisterWrite::ALL
            .iter()
            .copied()
            .map(PrivilegedOp::Register)
            .chain(std::iter::once(PrivilegedOp::UpdateSilent))
            .collect()
    }

    /// Exact command line, program first
    pub fn argv(&self) -> Vec<&'static str> {
        match self {
            PrivilegedOp::Register(w) => vec![paths::SMC_BINARY, "-k", w.key(), "-w", w.value()],
            PrivilegedOp::UpdateSilent => vec![paths::DAEMON_BINARY, "update_silent"],
        }
    }
}

impl fmt::Display for PrivilegedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Runs privileged operations
#[cfg_attr(test, mockall::automock)]
pub trait Elevator {
    fn run(&self, op: PrivilegedOp) -> Result<()>;
    /// True when `op` can be elevated without a password prompt
    fn can_run_unattended(&self, op: PrivilegedOp) -> bool;
}

/// Elevation through `sudo -n`; runs directly when already root
#[derive(Debug, Clone)]
pub struct SudoElevator {
    sudo: String,
}

impl Default for SudoElevator {
    fn default() -> Self {
        Self { sudo: paths::SUDO.to_string() }
    }
}

impl SudoElevator {
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&self, op: PrivilegedOp) -> Command {
        let argv = op.argv();
        if is_root() {
            let mut cmd = Command::new(argv[0]);
            cmd.args(&argv[1..]);
            cmd
        } else {
            let mut cmd = Command::new(&self.sudo);
            cmd.arg("-n").args(&argv);
            cmd
        }
    }
}

impl Elevator for SudoElevator {
    fn run(&self, op: PrivilegedOp) -> Result<()> {
        debug!("Elevating: {}", op);
        let output = self.command(op).output().map_err(|e| {
            ChargeKeeperError::PrivilegeEscalation(format!("failed to run {}: {}", op, e))
        })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ChargeKeeperError::PrivilegeEscalation(format!(
            "{} failed ({}): {}",
            op,
            output.status,
            stderr.trim()
        )))
    }

    fn can_run_unattended(&self, op: PrivilegedOp) -> bool {
        if is_root() {
            return true;
        }
        Command::new(&self.sudo)
            .arg("-n")
            .arg("-l")
            .args(op.argv())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// Effective uid is root
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}
