//! Charge targets and their validation
//!
//! A target is parsed from command line arguments, validated synchronously and only
//! then handed to the store or the supervisor. Nothing in here touches the disk.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::limits;
use crate::error::{ChargeKeeperError, Result};

lazy_static! {
    static ref PERCENTAGE_RE: Regex = Regex::new(r"^\d{1,3}$").unwrap();
    static ref RANGE_RE: Regex = Regex::new(r"^(\d{1,3})-(\d{1,3})$").unwrap();
    static ref VOLTAGE_RE: Regex = Regex::new(r"^(\d{1,2}(?:\.\d{1,3})?)[vV]$").unwrap();
    static ref HYSTERESIS_RE: Regex = Regex::new(r"^(\d(?:\.\d{1,3})?)[vV]?$").unwrap();
}

/// What the maintenance loop holds the battery at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetMode {
    /// Single percentage; the dead zone collapses to a point
    Percentage { value: u8 },
    /// Charge below `lower`, stop at `upper`
    PercentageRange { lower: u8, upper: u8 },
    /// Voltage centre with a symmetric hysteresis band, both in volts
    Voltage { center: f32, hysteresis: f32 },
}

/// A validated charge target as persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeTarget {
    #[serde(flatten)]
    pub mode: TargetMode,
    /// Discharge down to the lower bound before maintaining
    #[serde(default)]
    pub force_discharge: bool,
}

/// Dead zone the state machine keeps the battery in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounds {
    Percent { lower: u8, upper: u8 },
    Volts { lower: f32, upper: f32 },
}

impl ChargeTarget {
    pub fn percentage(value: u8) -> Result<Self> {
        if !is_valid_percentage(i64::from(value)) {
            return Err(ChargeKeeperError::InvalidPercentage(value.to_string()));
        }
        Ok(Self { mode: TargetMode::Percentage { value }, force_discharge: false })
    }

    pub fn range(lower: u8, upper: u8) -> Result<Self> {
        check_range(&format!("{lower}-{upper}"), i64::from(lower), i64::from(upper))?;
        Ok(Self { mode: TargetMode::PercentageRange { lower, upper }, force_discharge: false })
    }

    pub fn voltage(center: f32, hysteresis: f32) -> Result<Self> {
        check_voltage(center, &format!("{center}V"))?;
        check_hysteresis(hysteresis, &format!("{hysteresis}V"))?;
        Ok(Self { mode: TargetMode::Voltage { center, hysteresis }, force_discharge: false })
    }

    pub fn with_force_discharge(mut self, force_discharge: bool) -> Self {
        self.force_discharge = force_discharge;
        self
    }

    /// Parse the target part of `maintain` (everything except `stop`/`recover` and flags)
    ///
    /// Accepted forms: `80`, `70-80`, `11.4V`, `11.4V 0.3V`.
    pub fn parse(args: &[&str]) -> Result<Self> {
        let (first, rest) = match args.split_first() {
            Some(split) => split,
            None => return Err(ChargeKeeperError::InvalidArgument("missing target".to_string())),
        };
        let first = first.trim();

        if let Some(caps) = VOLTAGE_RE.captures(first) {
            let center = parse_volts(&caps[1], first, ChargeKeeperError::InvalidVoltage)?;
            let hysteresis = match rest {
                [] => limits::DEFAULT_HYSTERESIS,
                [h] => {
                    let h = h.trim();
                    let caps = HYSTERESIS_RE
                        .captures(h)
                        .ok_or_else(|| ChargeKeeperError::InvalidHysteresis(h.to_string()))?;
                    parse_volts(&caps[1], h, ChargeKeeperError::InvalidHysteresis)?
                }
                _ => return Err(too_many(args)),
            };
            return Self::voltage(center, hysteresis);
        }

        if !rest.is_empty() {
            return Err(too_many(args));
        }

        if let Some(caps) = RANGE_RE.captures(first) {
            let lower = parse_whole(&caps[1], first)?;
            let upper = parse_whole(&caps[2], first)?;
            check_range(first, lower, upper)?;
            return Self::range(lower as u8, upper as u8);
        }

        if PERCENTAGE_RE.is_match(first) {
            return Self::percentage(validate_percentage(first)?);
        }

        Err(ChargeKeeperError::InvalidArgument(format!(
            "'{first}' is not a percentage (80), a range (70-80) or a voltage (11.4V [0.3V])"
        )))
    }

    /// Dead zone for the state machine
    pub fn bounds(&self) -> Bounds {
        match self.mode {
            TargetMode::Percentage { value } => Bounds::Percent { lower: value, upper: value },
            TargetMode::PercentageRange { lower, upper } => Bounds::Percent { lower, upper },
            TargetMode::Voltage { center, hysteresis } => Bounds::Volts {
                lower: center - hysteresis,
                upper: center + hysteresis,
            },
        }
    }

    pub fn is_voltage(&self) -> bool {
        matches!(self.mode, TargetMode::Voltage { .. })
    }

    /// Arguments that reproduce this target on the command line
    pub fn to_args(&self) -> Vec<String> {
        let mut args = match self.mode {
            TargetMode::Percentage { value } => vec![value.to_string()],
            TargetMode::PercentageRange { lower, upper } => vec![format!("{lower}-{upper}")],
            TargetMode::Voltage { center, hysteresis } => {
                vec![format!("{center}V"), format!("{hysteresis}V")]
            }
        };
        if self.force_discharge {
            args.push("--force-discharge".to_string());
        }
        args
    }
}

impl fmt::Display for ChargeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            TargetMode::Percentage { value } => write!(f, "{value}%")?,
            TargetMode::PercentageRange { lower, upper } => write!(f, "{lower}-{upper}%")?,
            TargetMode::Voltage { center, hysteresis } => {
                write!(f, "{center:.2}V ±{hysteresis:.2}V")?
            }
        }
        if self.force_discharge {
            write!(f, " (force discharge)")?;
        }
        Ok(())
    }
}

/// Whole-number percentage check: 0 through 100 inclusive
pub fn is_valid_percentage(value: i64) -> bool {
    (0..=i64::from(limits::MAX_PERCENTAGE)).contains(&value)
}

/// Range check: both valid percentages, lower >= 10, upper <= 100, lower < upper
pub fn is_valid_range(lower: i64, upper: i64) -> bool {
    check_range("", lower, upper).is_ok()
}

/// Validate a percentage argument such as `charge 80`
pub fn validate_percentage(input: &str) -> Result<u8> {
    let trimmed = input.trim();
    if !PERCENTAGE_RE.is_match(trimmed) {
        return Err(ChargeKeeperError::InvalidPercentage(trimmed.to_string()));
    }
    let value = parse_whole(trimmed, trimmed)?;
    if !is_valid_percentage(value) {
        return Err(ChargeKeeperError::InvalidPercentage(trimmed.to_string()));
    }
    Ok(value as u8)
}

fn check_range(input: &str, lower: i64, upper: i64) -> Result<()> {
    if !is_valid_percentage(lower) || !is_valid_percentage(upper) {
        return Err(ChargeKeeperError::invalid_range(input, "both bounds must be between 0 and 100"));
    }
    if lower < i64::from(limits::MIN_RANGE_LOWER) {
        return Err(ChargeKeeperError::invalid_range(
            input,
            format!("lower bound must be at least {}", limits::MIN_RANGE_LOWER),
        ));
    }
    if lower >= upper {
        return Err(ChargeKeeperError::invalid_range(input, "lower bound must be below upper bound"));
    }
    Ok(())
}

fn check_voltage(center: f32, input: &str) -> Result<()> {
    if !center.is_finite() || !(limits::MIN_VOLTAGE..=limits::MAX_VOLTAGE).contains(&center) {
        return Err(ChargeKeeperError::InvalidVoltage(input.to_string()));
    }
    Ok(())
}

fn check_hysteresis(hysteresis: f32, input: &str) -> Result<()> {
    if !hysteresis.is_finite()
        || !(limits::MIN_HYSTERESIS..=limits::MAX_HYSTERESIS).contains(&hysteresis)
    {
        return Err(ChargeKeeperError::InvalidHysteresis(input.to_string()));
    }
    Ok(())
}

fn parse_whole(digits: &str, input: &str) -> Result<i64> {
    digits
        .parse::<i64>()
        .map_err(|_| ChargeKeeperError::InvalidPercentage(input.to_string()))
}

fn parse_volts(
    digits: &str,
    input: &str,
    err: fn(String) -> ChargeKeeperError,
) -> Result<f32> {
    digits.parse::<f32>().map_err(|_| err(input.to_string()))
}

fn too_many(args: &[&str]) -> ChargeKeeperError {
    ChargeKeeperError::InvalidArgument(format!("unexpected arguments: {}", args.join(" ")))
}
