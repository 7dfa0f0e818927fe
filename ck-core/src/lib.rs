//! ChargeKeeper Core Library
//!
//! Battery charge limiting for macOS laptops through the SMC power controller.
//!
//! # Module Structure
//!
//! - `hw/` - SMC register access, capability probing, charge control, telemetry
//! - `data/` - Charge targets, validation, persisted state and locks
//! - `engine/` - The charge state machine and the calibration plan
//! - `privilege/` - Elevation, the sudoers policy, installation audit, owner lookup
//!
//! # Example
//!
//! ```no_run
//! use ck_core::{transition, BatteryReading, ChargeState, ChargeTarget};
//!
//! let target = ChargeTarget::parse(&["70-80"]).unwrap();
//! let reading = BatteryReading { percentage: 85, ..Default::default() };
//! let (_state, effects) = transition(ChargeState::new(true), &reading, target.bounds());
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;
pub mod privilege;

// Standalone modules
pub mod constants;
pub mod process;
pub mod service;
pub mod update;

/// Error types shared with the binary
pub mod error {
    pub use ck_error::*;
}

pub use error::{ChargeKeeperError, Result};

pub use data::{
    is_valid_percentage, is_valid_range, validate_percentage, Bounds, ChargeTarget,
    FsStateStore, MemoryStateStore, ProcessLock, Role, StateStore, TargetMode,
};

pub use engine::{calibration_plan, converge_interval, transition, CalibrationStep, ChargeState, Converge, Effect};

pub use hw::{
    AdapterKey, BatteryReading, CapabilitySet, ChargeController, ChargingKey, LedColor,
    PmsetTelemetry, RegisterIo, RegisterWrite, SmcTool, TelemetrySource,
};

pub use privilege::{
    is_root, render_policy, resolve_owner, verify_elevated_paths, AuditReport, Elevator,
    InstallLayout, InstallationAuditor, Owner, PolicyInstaller, PolicyOutcome, PolicyValidator,
    PrivilegedOp, SudoElevator, Visudo,
};

pub use process::{preempt, take_over, ProcessControl, SystemProcesses};

pub use service::{render_launch_agent, AgentStatus, LaunchAgent, Launchctl, SystemLaunchctl};

pub use update::{
    is_newer, parse_version, script_version, HttpFetcher, ScriptFetcher, ScriptRunner,
    ShellRunner, UpdateDecision, Updater,
};
