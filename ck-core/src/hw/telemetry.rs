//! Battery telemetry from `pmset` and `ioreg`
//!
//! `pmset -g batt` gives the percentage, the OS charging state and whether the
//! adapter is attached. The pack voltage comes from the `AppleSmartBattery`
//! IORegistry entry in millivolts.

use std::process::Command;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace};

use crate::constants::paths;
use crate::error::{ChargeKeeperError, Result};

lazy_static! {
    static ref PERCENT_RE: Regex = Regex::new(r"(\d{1,3})%").unwrap();
    static ref REMAINING_RE: Regex = Regex::new(r"(\d+:\d{2}) remaining").unwrap();
    static ref VOLTAGE_RE: Regex = Regex::new(r#""Voltage"\s*=\s*(\d+)"#).unwrap();
}

/// One telemetry sample
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatteryReading {
    /// State of charge, 0-100
    pub percentage: u8,
    /// Time estimate as printed by the OS (`"1:23"`), when it has one
    pub remaining: Option<String>,
    /// Adapter attached
    pub plugged_in: bool,
    /// OS reports the battery as charging
    pub os_charging: bool,
    /// Pack voltage in volts
    pub voltage: Option<f32>,
}

/// Source of battery samples
pub trait TelemetrySource {
    fn read(&self) -> Result<BatteryReading>;
}

/// Live telemetry via the system tools
#[derive(Debug, Default, Clone, Copy)]
pub struct PmsetTelemetry;

impl PmsetTelemetry {
    fn run(program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ChargeKeeperError::Telemetry(format!("failed to run {program}: {e}")))?;
        if !output.status.success() {
            return Err(ChargeKeeperError::Telemetry(format!(
                "{program} exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TelemetrySource for PmsetTelemetry {
    fn read(&self) -> Result<BatteryReading> {
        let batt = Self::run(paths::PMSET, &["-g", "batt"])?;
        trace!("pmset: {:?}", batt);
        let mut reading = parse_pmset(&batt)?;

        match Self::run(paths::IOREG, &["-r", "-n", "AppleSmartBattery"]) {
            Ok(ioreg) => reading.voltage = parse_ioreg_voltage(&ioreg),
            Err(e) => debug!("Voltage unavailable: {}", e),
        }
        Ok(reading)
    }
}

/// Parse `pmset -g batt`
///
/// ```text
/// Now drawing from 'AC Power'
///  -InternalBattery-0 (id=4653155)	80%; charging; 1:02 remaining present: true
/// ```
pub fn parse_pmset(output: &str) -> Result<BatteryReading> {
    let line = output
        .lines()
        .find(|l| l.contains("InternalBattery"))
        .ok_or_else(|| ChargeKeeperError::Telemetry("no internal battery reported".to_string()))?;

    let percentage = PERCENT_RE
        .captures(line)
        .and_then(|c| c[1].parse::<u8>().ok())
        .filter(|p| *p <= 100)
        .ok_or_else(|| ChargeKeeperError::Telemetry(format!("no percentage in {line:?}")))?;

    let state = line.split(';').nth(1).map(str::trim).unwrap_or("");

    Ok(BatteryReading {
        percentage,
        remaining: REMAINING_RE.captures(line).map(|c| c[1].to_string()),
        plugged_in: output.contains("'AC Power'"),
        os_charging: state == "charging",
        voltage: None,
    })
}

/// Parse the `"Voltage" = 12345` entry of an `ioreg` dump, in volts
pub fn parse_ioreg_voltage(output: &str) -> Option<f32> {
    VOLTAGE_RE
        .captures(output)
        .and_then(|c| c[1].parse::<u32>().ok())
        .map(|mv| mv as f32 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHARGING: &str = "Now drawing from 'AC Power'\n -InternalBattery-0 (id=4653155)\t80%; charging; 1:02 remaining present: true\n";
    const DISCHARGING: &str = "Now drawing from 'Battery Power'\n -InternalBattery-0 (id=4653155)\t57%; discharging; 4:11 remaining present: true\n";
    const HELD: &str = "Now drawing from 'AC Power'\n -InternalBattery-0 (id=4653155)\t80%; AC attached; not charging present: true\n";

    #[test]
    fn test_parse_charging() {
        let r = parse_pmset(CHARGING).unwrap();
        assert_eq!(r.percentage, 80);
        assert!(r.plugged_in);
        assert!(r.os_charging);
        assert_eq!(r.remaining.as_deref(), Some("1:02"));
    }

    #[test]
    fn test_parse_discharging() {
        let r = parse_pmset(DISCHARGING).unwrap();
        assert_eq!(r.percentage, 57);
        assert!(!r.plugged_in);
        assert!(!r.os_charging);
    }

    #[test]
    fn test_parse_held_on_adapter() {
        let r = parse_pmset(HELD).unwrap();
        assert!(r.plugged_in);
        assert!(!r.os_charging);
        assert_eq!(r.remaining, None);
    }

    #[test]
    fn test_parse_without_battery() {
        assert!(parse_pmset("Now drawing from 'AC Power'\n").is_err());
    }

    #[test]
    fn test_parse_voltage() {
        let dump = "  \"Amperage\" = 0\n  \"Voltage\" = 12543\n  \"CycleCount\" = 210\n";
        let v = parse_ioreg_voltage(dump).unwrap();
        assert!((v - 12.543).abs() < 1e-4);
        assert_eq!(parse_ioreg_voltage("\"AppleRawMaxCapacity\" = 1"), None);
    }
}
