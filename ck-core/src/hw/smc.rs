//! SMC register access through the `smc` command line tool
//!
//! Reads run unprivileged. Writes are limited to the closed [`RegisterWrite`] table and
//! always go through the elevation layer, so no caller-supplied key or value can ever
//! reach the power controller.
//!
//! # Output format
//!
//! `smc -k CH0B -r` prints `  CH0B  [hex_]  (bytes 02)`; keys the controller does not
//! implement print `no data`.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace};

use crate::constants::{paths, smc};
use crate::error::{ChargeKeeperError, Result};
use crate::privilege::{Elevator, PrivilegedOp};

lazy_static! {
    static ref BYTES_RE: Regex = Regex::new(r"\(bytes ([0-9a-fA-F ]+)\)").unwrap();
}

/// MagSafe LED colours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedColor {
    /// Target reached
    Green,
    /// Charging toward the target
    Orange,
    Off,
    /// Hand the LED back to the firmware
    System,
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedColor::Green => "green",
            LedColor::Orange => "orange",
            LedColor::Off => "off",
            LedColor::System => "system",
        };
        write!(f, "{name}")
    }
}

/// Every register write the daemon may perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterWrite {
    ChargingModernOn,
    ChargingModernOff,
    ChargingLegacyBOn,
    ChargingLegacyBOff,
    ChargingLegacyCOn,
    ChargingLegacyCOff,
    AdapterModernOn,
    AdapterModernOff,
    AdapterLegacyJOn,
    AdapterLegacyJOff,
    AdapterLegacyIOn,
    AdapterLegacyIOff,
    Led(LedColor),
}

impl RegisterWrite {
    /// Closed table, in policy order
    pub const ALL: [RegisterWrite; 16] = [
        RegisterWrite::ChargingModernOn,
        RegisterWrite::ChargingModernOff,
        RegisterWrite::ChargingLegacyBOn,
        RegisterWrite::ChargingLegacyBOff,
        RegisterWrite::ChargingLegacyCOn,
        RegisterWrite::ChargingLegacyCOff,
        RegisterWrite::AdapterModernOn,
        RegisterWrite::AdapterModernOff,
        RegisterWrite::AdapterLegacyJOn,
        RegisterWrite::AdapterLegacyJOff,
        RegisterWrite::AdapterLegacyIOn,
        RegisterWrite::AdapterLegacyIOff,
        RegisterWrite::Led(LedColor::Green),
        RegisterWrite::Led(LedColor::Orange),
        RegisterWrite::Led(LedColor::Off),
        RegisterWrite::Led(LedColor::System),
    ];

    pub fn key(self) -> &'static str {
        use RegisterWrite::*;
        match self {
            ChargingModernOn | ChargingModernOff => smc::CHARGING_MODERN,
            ChargingLegacyBOn | ChargingLegacyBOff => smc::CHARGING_LEGACY_B,
            ChargingLegacyCOn | ChargingLegacyCOff => smc::CHARGING_LEGACY_C,
            AdapterModernOn | AdapterModernOff => smc::ADAPTER_MODERN,
            AdapterLegacyJOn | AdapterLegacyJOff => smc::ADAPTER_LEGACY_J,
            AdapterLegacyIOn | AdapterLegacyIOff => smc::ADAPTER_LEGACY_I,
            Led(_) => smc::MAGSAFE_LED,
        }
    }

    pub fn value(self) -> &'static str {
        use RegisterWrite::*;
        match self {
            ChargingModernOn => smc::CHARGING_MODERN_ON,
            ChargingModernOff => smc::CHARGING_MODERN_OFF,
            ChargingLegacyBOn | ChargingLegacyCOn => smc::CHARGING_LEGACY_ON,
            ChargingLegacyBOff | ChargingLegacyCOff => smc::CHARGING_LEGACY_OFF,
            AdapterModernOn | AdapterLegacyJOn | AdapterLegacyIOn => smc::ADAPTER_ON,
            AdapterModernOff => smc::ADAPTER_MODERN_OFF,
            AdapterLegacyJOff | AdapterLegacyIOff => smc::ADAPTER_LEGACY_OFF,
            Led(LedColor::Green) => smc::LED_GREEN,
            Led(LedColor::Orange) => smc::LED_ORANGE,
            Led(LedColor::Off) => smc::LED_OFF,
            Led(LedColor::System) => smc::LED_SYSTEM,
        }
    }
}

impl fmt::Display for RegisterWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key(), self.value())
    }
}

/// Low-level register access
#[cfg_attr(test, mockall::automock)]
pub trait RegisterIo {
    /// Raw bytes as a hex string (`"02"`, `"01000000"`), or `None` when the key has no data
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, write: RegisterWrite) -> Result<()>;
}

/// The installed `smc` binary
#[derive(Debug)]
pub struct SmcTool<E: Elevator> {
    binary: PathBuf,
    elevator: E,
}

impl<E: Elevator> SmcTool<E> {
    pub fn new(elevator: E) -> Self {
        Self { binary: PathBuf::from(paths::SMC_BINARY), elevator }
    }
}

impl<E: Elevator> RegisterIo for SmcTool<E> {
    fn read(&self, key: &str) -> Option<String> {
        let output = match Command::new(&self.binary).args(["-k", key, "-r"]).output() {
            Ok(o) => o,
            Err(e) => {
                debug!("Could not run {:?} for {}: {}", self.binary, key, e);
                return None;
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("smc read {} -> {:?}", key, stdout.trim());
        if !output.status.success() {
            return None;
        }
        parse_read_output(&stdout)
    }

    fn write(&self, write: RegisterWrite) -> Result<()> {
        debug!("Writing {}", write);
        self.elevator
            .run(PrivilegedOp::Register(write))
            .map_err(|e| ChargeKeeperError::RegisterWrite {
                key: write.key().to_string(),
                value: write.value().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Extract the raw bytes from `smc -r` output
pub fn parse_read_output(output: &str) -> Option<String> {
    if output.contains(smc::NO_DATA_MARKER) {
        return None;
    }
    let caps = BYTES_RE.captures(output)?;
    let bytes: String = caps[1].split_whitespace().collect::<Vec<_>>().concat();
    if bytes.is_empty() {
        None
    } else {
        Some(bytes.to_ascii_lowercase())
    }
}

/// True when every byte of a raw value is zero
pub fn is_all_zero(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(|c| c == '0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_output() {
        assert_eq!(parse_read_output("  CH0B  [hex_]  (bytes 02)\n"), Some("02".to_string()));
        assert_eq!(
            parse_read_output("  CHTE  [ui32]  16777216 (bytes 01 00 00 00)"),
            Some("01000000".to_string())
        );
        assert_eq!(parse_read_output("  CHIE  [hex_]  (bytes 0A)"), Some("0a".to_string()));
        assert_eq!(parse_read_output("  CH0I  [    ]  no data"), None);
        assert_eq!(parse_read_output(""), None);
    }

    #[test]
    fn test_is_all_zero() {
        assert!(is_all_zero("00"));
        assert!(is_all_zero("00000000"));
        assert!(!is_all_zero("02"));
        assert!(!is_all_zero("01000000"));
        assert!(!is_all_zero(""));
    }

    #[test]
    fn test_write_table_is_closed_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for w in RegisterWrite::ALL {
            assert!(seen.insert((w.key(), w.value())), "duplicate entry {w}");
            assert!(w.key().chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(w.value().chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert_eq!(RegisterWrite::Led(LedColor::System).value(), "00");
        assert_eq!(RegisterWrite::ChargingModernOff.to_string(), "CHTE=01000000");
    }
}
