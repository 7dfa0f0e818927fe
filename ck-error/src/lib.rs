//! Unified error handling for ChargeKeeper
//!
//! This crate provides a single error type used across all ChargeKeeper components.
//! Variants are grouped by how the caller is expected to react: validation errors are
//! rejected before any side effect, hardware errors are logged and the loop continues,
//! integrity errors force a full reinstall.

use std::io;
use std::path::PathBuf;

/// Result type alias using ChargeKeeperError
pub type Result<T> = std::result::Result<T, ChargeKeeperError>;

/// Exit code used when the unprivileged owner of the installation cannot be determined
pub const EXIT_OWNER_UNKNOWN: i32 = 11;

/// Exit code used for generic validation and operational failures
pub const EXIT_FAILURE: i32 = 1;

/// Exit code reported after an interrupt signal
pub const EXIT_INTERRUPTED: i32 = 130;

/// Unified error type for all ChargeKeeper operations
#[derive(thiserror::Error, Debug)]
pub enum ChargeKeeperError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Validation Errors (rejected synchronously, no side effects)
    // ============================================================================
    #[error("Invalid percentage: {0} (must be a whole number between 0 and 100)")]
    InvalidPercentage(String),

    #[error("Invalid range: {input} ({reason})")]
    InvalidRange {
        input: String,
        reason: String,
    },

    #[error("Invalid voltage: {0} (must be between 10.5V and 12.6V)")]
    InvalidVoltage(String),

    #[error("Invalid hysteresis: {0} (must be between 0.1V and 2V)")]
    InvalidHysteresis(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ============================================================================
    // Privilege Errors
    // ============================================================================
    #[error("This command must be run with root privileges: {0}")]
    NotElevated(String),

    #[error("Could not determine the unprivileged owner of this installation")]
    OwnerUnknown,

    #[error("Failed to execute privileged command: {0}")]
    PrivilegeEscalation(String),

    // ============================================================================
    // Hardware Access Errors (logged, the control loop continues)
    // ============================================================================
    #[error("Failed to write {value} to SMC key {key}: {reason}")]
    RegisterWrite {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Battery telemetry unavailable: {0}")]
    Telemetry(String),

    // ============================================================================
    // Integrity Errors (force a full reinstall)
    // ============================================================================
    #[error("Installation integrity check failed for {path}: {reason}")]
    Integrity {
        path: PathBuf,
        reason: String,
    },

    #[error("Privilege policy rejected by visudo: {0}")]
    PolicyRejected(String),

    // ============================================================================
    // Network Errors
    // ============================================================================
    #[error("Update fetch failed: {0}")]
    Network(String),

    #[error("Update failed: {0}")]
    Update(String),

    // ============================================================================
    // Process and Service Errors
    // ============================================================================
    #[error("Process error: {0}")]
    Process(String),

    #[error("Service error: {0}")]
    Service(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl ChargeKeeperError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create an invalid range error
    pub fn invalid_range(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an integrity error for a path
    pub fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a process error from a string
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Create a service error from a string
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Malformed user input, rejected before anything is persisted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPercentage(_)
                | Self::InvalidRange { .. }
                | Self::InvalidVoltage(_)
                | Self::InvalidHysteresis(_)
                | Self::InvalidArgument(_)
        )
    }

    /// Register or telemetry failure; callers log it and keep going
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::RegisterWrite { .. } | Self::Telemetry(_))
    }

    /// Tampered or corrupted installation
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::PolicyRejected(_))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::OwnerUnknown => EXIT_OWNER_UNKNOWN,
            _ => EXIT_FAILURE,
        }
    }
}

// Allow converting from String to ChargeKeeperError
impl From<String> for ChargeKeeperError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to ChargeKeeperError
impl From<&str> for ChargeKeeperError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
