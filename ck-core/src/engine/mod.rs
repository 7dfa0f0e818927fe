//! Charge control decisions, free of I/O

pub mod calibration;
pub mod machine;

pub use calibration::{plan as calibration_plan, CalibrationStep};
pub use machine::{converge_interval, transition, ChargeState, Converge, Effect};
