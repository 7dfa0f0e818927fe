//! Calibration sequence
//!
//! A full cycle lets the fuel gauge re-learn the pack: drain low, charge full,
//! rest at full, then come back down to a storage level before normal
//! maintenance resumes.

use std::fmt;
use std::time::Duration;

use crate::constants::{calibration, timing};
use crate::engine::machine::Converge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    /// Charge or discharge to a percentage
    Converge(Converge),
    /// Keep the charger on for a while at full
    Hold(Duration),
    /// Drop the calibrate lock
    ReleaseLock,
    /// Restart the persisted maintenance target
    ResumeMaintenance,
}

impl fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationStep::Converge(Converge::Discharge(p)) => write!(f, "discharge to {p}%"),
            CalibrationStep::Converge(Converge::Charge(p)) => write!(f, "charge to {p}%"),
            CalibrationStep::Hold(d) => write!(f, "hold for {} minutes", d.as_secs() / 60),
            CalibrationStep::ReleaseLock => write!(f, "release calibration lock"),
            CalibrationStep::ResumeMaintenance => write!(f, "resume maintenance"),
        }
    }
}

/// Steps in execution order
pub fn plan() -> Vec<CalibrationStep> {
    vec![
        CalibrationStep::Converge(Converge::Discharge(calibration::DISCHARGE_LOW)),
        CalibrationStep::Converge(Converge::Charge(calibration::CHARGE_FULL)),
        CalibrationStep::Hold(timing::CALIBRATION_HOLD),
        CalibrationStep::Converge(Converge::Discharge(calibration::DISCHARGE_FINAL)),
        CalibrationStep::ReleaseLock,
        CalibrationStep::ResumeMaintenance,
    ]
}
