//! Power controller access
//!
//! - [`smc`]: raw register reads and the closed write table
//! - [`capability`]: which keys this machine implements
//! - [`control`]: charge, discharge and LED operations
//! - [`telemetry`]: battery percentage and voltage

pub mod capability;
pub mod control;
pub mod smc;
pub mod telemetry;

pub use capability::{AdapterKey, CapabilitySet, ChargingKey};
pub use control::ChargeController;
pub use smc::{LedColor, RegisterIo, RegisterWrite, SmcTool};
pub use telemetry::{BatteryReading, PmsetTelemetry, TelemetrySource};
