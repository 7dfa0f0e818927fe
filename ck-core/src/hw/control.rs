//! Charging, adapter and LED control on top of the probed capabilities
//!
//! Every operation picks the best supported key from the [`CapabilitySet`]. With no
//! supported key the operation warns and does nothing. Write failures are returned so
//! the caller can log them; none of them is fatal to a control loop.

use tracing::{debug, warn};

use crate::error::Result;
use crate::hw::capability::CapabilitySet;
use crate::hw::smc::{is_all_zero, LedColor, RegisterIo, RegisterWrite};

/// Charge/discharge operations for one power controller
pub struct ChargeController<'a> {
    io: &'a dyn RegisterIo,
    caps: CapabilitySet,
}

impl<'a> ChargeController<'a> {
    pub fn new(io: &'a dyn RegisterIo, caps: CapabilitySet) -> Self {
        Self { io, caps }
    }

    pub fn enable_charging(&self) -> Result<()> {
        self.set_charging(true)
    }

    pub fn disable_charging(&self) -> Result<()> {
        self.set_charging(false)
    }

    fn set_charging(&self, enable: bool) -> Result<()> {
        let Some(key) = self.caps.charging_key() else {
            warn!("Cannot {} charging: no supported SMC key", if enable { "enable" } else { "disable" });
            return Ok(());
        };
        debug!("{} charging via {:?} key", if enable { "Enabling" } else { "Disabling" }, key);
        for write in key.writes(enable) {
            self.io.write(*write)?;
        }
        Ok(())
    }

    /// Cut the adapter so the battery discharges while plugged in
    pub fn enable_discharge(&self) -> Result<()> {
        self.set_discharge(true)
    }

    /// Restore the adapter
    pub fn disable_discharge(&self) -> Result<()> {
        self.set_discharge(false)
    }

    fn set_discharge(&self, discharge: bool) -> Result<()> {
        let Some(key) = self.caps.adapter_key() else {
            warn!(
                "Cannot {} discharging: no supported SMC key",
                if discharge { "enable" } else { "disable" }
            );
            return Ok(());
        };
        self.io.write(key.write(discharge))
    }

    pub fn set_led(&self, color: LedColor) -> Result<()> {
        self.io.write(RegisterWrite::Led(color))
    }

    /// `Some(true)` when the charging key reads all zero, `None` when unknown
    pub fn charging_enabled(&self) -> Option<bool> {
        let key = self.caps.charging_key()?;
        self.io.read(key.status_key()).map(|raw| is_all_zero(&raw))
    }

    /// `Some(true)` when the adapter key reads non-zero, `None` when unknown
    pub fn discharging(&self) -> Option<bool> {
        let key = self.caps.adapter_key()?;
        self.io.read(key.status_key()).map(|raw| !is_all_zero(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::smc::MockRegisterIo;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_legacy_disable_writes_both_keys_in_order() {
        let mut io = MockRegisterIo::new();
        let mut seq = Sequence::new();
        io.expect_write()
            .with(eq(RegisterWrite::ChargingLegacyBOff))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        io.expect_write()
            .with(eq(RegisterWrite::ChargingLegacyCOff))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let caps = CapabilitySet { charging_legacy: true, ..Default::default() };
        ChargeController::new(&io, caps).disable_charging().unwrap();
    }

    #[test]
    fn test_modern_key_wins() {
        let mut io = MockRegisterIo::new();
        io.expect_write()
            .with(eq(RegisterWrite::ChargingModernOn))
            .times(1)
            .returning(|_| Ok(()));

        let caps = CapabilitySet { charging_modern: true, charging_legacy: true, ..Default::default() };
        ChargeController::new(&io, caps).enable_charging().unwrap();
    }

    #[test]
    fn test_unsupported_is_noop() {
        let mut io = MockRegisterIo::new();
        io.expect_write().never();
        io.expect_read().never();

        let ctl = ChargeController::new(&io, CapabilitySet::default());
        ctl.enable_charging().unwrap();
        ctl.enable_discharge().unwrap();
        assert_eq!(ctl.charging_enabled(), None);
        assert_eq!(ctl.discharging(), None);
    }

    #[test]
    fn test_status_reads() {
        let mut io = MockRegisterIo::new();
        io.expect_read().with(eq("CHTE")).returning(|_| Some("01000000".to_string()));
        io.expect_read().with(eq("CHIE")).returning(|_| Some("08".to_string()));

        let caps = CapabilitySet { charging_modern: true, adapter_modern: true, ..Default::default() };
        let ctl = ChargeController::new(&io, caps);
        assert_eq!(ctl.charging_enabled(), Some(false));
        assert_eq!(ctl.discharging(), Some(true));
    }
}
