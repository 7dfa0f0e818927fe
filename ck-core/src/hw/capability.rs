//! Which SMC control keys the installed power controller implements
//!
//! Probed once at startup by reading each candidate key; a key that answers
//! `no data` (or cannot be read at all) is unsupported. The result never changes
//! for the lifetime of the process.

use std::fmt;

use tracing::{info, warn};

use crate::constants::smc;
use crate::hw::smc::{RegisterIo, RegisterWrite};

/// Register family used for charging control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingKey {
    /// `CHTE`
    Modern,
    /// `CH0B` + `CH0C`
    Legacy,
}

/// Register used for adapter (force discharge) control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKey {
    /// `CHIE`
    Modern,
    /// `CH0J`
    LegacyJ,
    /// `CH0I`
    LegacyI,
}

impl ChargingKey {
    /// Key whose value reflects the charging state
    pub fn status_key(self) -> &'static str {
        match self {
            ChargingKey::Modern => smc::CHARGING_MODERN,
            ChargingKey::Legacy => smc::CHARGING_LEGACY_B,
        }
    }

    pub fn writes(self, enable: bool) -> &'static [RegisterWrite] {
        use RegisterWrite::*;
        match (self, enable) {
            (ChargingKey::Modern, true) => &[ChargingModernOn],
            (ChargingKey::Modern, false) => &[ChargingModernOff],
            (ChargingKey::Legacy, true) => &[ChargingLegacyBOn, ChargingLegacyCOn],
            (ChargingKey::Legacy, false) => &[ChargingLegacyBOff, ChargingLegacyCOff],
        }
    }
}

impl AdapterKey {
    pub fn status_key(self) -> &'static str {
        match self {
            AdapterKey::Modern => smc::ADAPTER_MODERN,
            AdapterKey::LegacyJ => smc::ADAPTER_LEGACY_J,
            AdapterKey::LegacyI => smc::ADAPTER_LEGACY_I,
        }
    }

    /// Write that cuts the adapter (`true`, battery discharges) or restores it
    pub fn write(self, discharge: bool) -> RegisterWrite {
        use RegisterWrite::*;
        match (self, discharge) {
            (AdapterKey::Modern, true) => AdapterModernOff,
            (AdapterKey::Modern, false) => AdapterModernOn,
            (AdapterKey::LegacyJ, true) => AdapterLegacyJOff,
            (AdapterKey::LegacyJ, false) => AdapterLegacyJOn,
            (AdapterKey::LegacyI, true) => AdapterLegacyIOff,
            (AdapterKey::LegacyI, false) => AdapterLegacyIOn,
        }
    }
}

/// Probed support for the five control keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    pub charging_modern: bool,
    pub charging_legacy: bool,
    pub adapter_modern: bool,
    pub adapter_legacy_j: bool,
    pub adapter_legacy_i: bool,
}

impl CapabilitySet {
    /// Read each candidate key once
    pub fn probe(io: &dyn RegisterIo) -> Self {
        let has = |key: &str| io.read(key).is_some();
        let caps = Self {
            charging_modern: has(smc::CHARGING_MODERN),
            charging_legacy: has(smc::CHARGING_LEGACY_B),
            adapter_modern: has(smc::ADAPTER_MODERN),
            adapter_legacy_j: has(smc::ADAPTER_LEGACY_J),
            adapter_legacy_i: has(smc::ADAPTER_LEGACY_I),
        };

        info!("SMC capabilities: {}", caps);
        if caps.charging_key().is_none() {
            warn!("No supported charging control key found; charge limiting is unavailable");
        }
        if caps.adapter_key().is_none() {
            warn!("No supported adapter control key found; forced discharge is unavailable");
        }
        caps
    }

    /// Preferred charging key, newest first
    pub fn charging_key(&self) -> Option<ChargingKey> {
        if self.charging_modern {
            Some(ChargingKey::Modern)
        } else if self.charging_legacy {
            Some(ChargingKey::Legacy)
        } else {
            None
        }
    }

    /// Preferred adapter key, newest first
    pub fn adapter_key(&self) -> Option<AdapterKey> {
        if self.adapter_modern {
            Some(AdapterKey::Modern)
        } else if self.adapter_legacy_j {
            Some(AdapterKey::LegacyJ)
        } else if self.adapter_legacy_i {
            Some(AdapterKey::LegacyI)
        } else {
            None
        }
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |b: bool| if b { "yes" } else { "no" };
        write!(
            f,
            "CHTE={} CH0B={} CHIE={} CH0J={} CH0I={}",
            flag(self.charging_modern),
            flag(self.charging_legacy),
            flag(self.adapter_modern),
            flag(self.adapter_legacy_j),
            flag(self.adapter_legacy_i)
        )
    }
}
