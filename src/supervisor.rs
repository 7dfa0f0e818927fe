/*
 * This file is part of ChargeKeeper.
 *
 * Copyright (C) 2025 ChargeKeeper contributors
 *
 * ChargeKeeper is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * ChargeKeeper is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with ChargeKeeper. If not, see <https://www.gnu.org/licenses/>.
 */

//! Control loops
//!
//! Every loop is "read, transition, apply, sleep". Register tool, telemetry and
//! clock are injected so the loops run without hardware in tests. Hardware
//! failures are logged and the loop carries on at the next tick.

use std::time::Duration;

use ck_core::constants::timing;
use ck_core::{
    calibration_plan, transition, Bounds, BatteryReading, CalibrationStep, CapabilitySet,
    ChargeController, ChargeState, ChargeTarget, Converge, Effect, RegisterIo, Result, Role,
    StateStore, TelemetrySource,
};
use tracing::{debug, info, warn};

/// Sleeping, separated so tests do not wait
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct Supervisor<'a> {
    io: &'a dyn RegisterIo,
    caps: CapabilitySet,
    telemetry: &'a dyn TelemetrySource,
    clock: &'a dyn Clock,
    store: &'a dyn StateStore,
}

impl<'a> Supervisor<'a> {
    pub fn new(
        io: &'a dyn RegisterIo,
        caps: CapabilitySet,
        telemetry: &'a dyn TelemetrySource,
        clock: &'a dyn Clock,
        store: &'a dyn StateStore,
    ) -> Self {
        Self { io, caps, telemetry, clock, store }
    }

    fn controller(&self) -> ChargeController<'a> {
        ChargeController::new(self.io, self.caps)
    }

    /// Apply effects; a failed write is logged and the rest still run
    pub fn apply(&self, effects: &[Effect]) {
        let ctl = self.controller();
        for effect in effects {
            let result = match effect {
                Effect::EnableCharging => ctl.enable_charging(),
                Effect::DisableCharging => ctl.disable_charging(),
                Effect::EnableDischarge => ctl.enable_discharge(),
                Effect::DisableDischarge => ctl.disable_discharge(),
                Effect::SetLed(color) => ctl.set_led(*color),
            };
            match result {
                Ok(()) => debug!("Applied {:?}", effect),
                Err(e) => warn!("{:?} failed: {}", effect, e),
            }
        }
    }

    fn read(&self) -> Option<BatteryReading> {
        match self.telemetry.read() {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Whether `target` is still the persisted one
    ///
    /// A store that cannot be read keeps the loop going; the next tick retries.
    fn still_wanted(&self, target: &ChargeTarget) -> bool {
        match self.store.load_target() {
            Ok(Some(current)) if current == *target => true,
            Ok(Some(current)) => {
                info!("Target changed to {}; leaving the loop", current);
                false
            }
            Ok(None) => {
                info!("Target cleared; leaving the loop");
                false
            }
            Err(e) => {
                warn!("{}", e);
                true
            }
        }
    }

    /// Hold the battery within `target`
    ///
    /// The persisted target is checked at every tick boundary, so a `stop` or a
    /// new target ends the loop without writing even if no signal reaches it.
    /// Runs until then, or for `ticks` ticks when given.
    pub fn maintain(&self, target: &ChargeTarget, ticks: Option<usize>) -> Result<()> {
        let bounds = target.bounds();
        info!("Maintaining battery at {}", target);

        if target.force_discharge && !self.force_discharge(target, bounds) {
            return Ok(());
        }

        // Unknown hardware state is treated as enabled so an over-target battery is cut off.
        let mut state = ChargeState::new(self.controller().charging_enabled().unwrap_or(true));
        let mut tick = 0usize;
        loop {
            if ticks.is_some_and(|max| tick >= max) {
                return Ok(());
            }
            tick += 1;

            if !self.still_wanted(target) {
                return Ok(());
            }
            if let Some(reading) = self.read() {
                if let Some(enabled) = self.controller().charging_enabled() {
                    state = ChargeState::new(enabled);
                }
                let (next, effects) = transition(state, &reading, bounds);
                if !effects.is_empty() {
                    info!("Battery at {}%: {:?}", reading.percentage, effects);
                }
                self.apply(&effects);
                state = next;
            }
            self.clock.sleep(timing::MAINTAIN_INTERVAL);
        }
    }

    /// Cut the adapter until the battery is at or below the lower bound
    ///
    /// Returns false when the target went away meanwhile; the adapter is restored
    /// either way.
    fn force_discharge(&self, target: &ChargeTarget, bounds: Bounds) -> bool {
        info!("Discharging before maintenance starts");
        self.apply(&[Effect::DisableCharging, Effect::EnableDischarge]);
        loop {
            if !self.still_wanted(target) {
                self.apply(&[Effect::DisableDischarge]);
                return false;
            }
            let below = self.read().map(|r| match bounds {
                Bounds::Percent { lower, .. } => r.percentage <= lower,
                Bounds::Volts { lower, .. } => r.voltage.is_some_and(|v| v <= lower),
            });
            if below == Some(true) {
                break;
            }
            self.clock.sleep(timing::MAINTAIN_INTERVAL);
        }
        self.apply(&[Effect::DisableDischarge]);
        true
    }

    /// Charge or discharge until the goal is reached
    pub fn converge(&self, goal: Converge) -> Result<()> {
        info!("{:?}: starting", goal);
        self.apply(&goal.start_effects());
        loop {
            let interval = match self.read() {
                Some(r) if goal.reached(r.percentage) => {
                    info!("{:?}: reached at {}%", goal, r.percentage);
                    break;
                }
                Some(r) => {
                    debug!("{:?}: battery at {}%", goal, r.percentage);
                    goal.interval(r.percentage)
                }
                None => timing::CONVERGE_INTERVAL,
            };
            self.clock.sleep(interval);
        }
        self.apply(&goal.finish_effects());
        Ok(())
    }

    /// Run the calibration plan; `resume` restarts maintenance at the end
    pub fn calibrate(&self, mut resume: impl FnMut() -> Result<()>) -> Result<()> {
        for step in calibration_plan() {
            info!("Calibration: {}", step);
            match step {
                CalibrationStep::Converge(goal) => self.converge(goal)?,
                CalibrationStep::Hold(duration) => {
                    self.apply(&[Effect::DisableDischarge, Effect::EnableCharging]);
                    self.clock.sleep(duration);
                }
                CalibrationStep::ReleaseLock => self.store.release_lock(Role::Calibrate)?,
                CalibrationStep::ResumeMaintenance => resume()?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ck_core::{ChargeKeeperError, LedColor, MemoryStateStore, RegisterWrite};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Modern-key machine whose charging register follows the writes
    #[derive(Default)]
    struct FakeSmc {
        charging_off: Mutex<bool>,
        writes: Mutex<Vec<RegisterWrite>>,
    }

    impl RegisterIo for FakeSmc {
        fn read(&self, key: &str) -> Option<String> {
            match key {
                "CHTE" if *self.charging_off.lock().unwrap() => Some("01000000".into()),
                "CHTE" => Some("00000000".into()),
                "CHIE" => Some("00".into()),
                _ => None,
            }
        }

        fn write(&self, write: RegisterWrite) -> Result<()> {
            match write {
                RegisterWrite::ChargingModernOff => *self.charging_off.lock().unwrap() = true,
                RegisterWrite::ChargingModernOn => *self.charging_off.lock().unwrap() = false,
                _ => {}
            }
            self.writes.lock().unwrap().push(write);
            Ok(())
        }
    }

    struct Script(RefCell<VecDeque<u8>>);

    impl Script {
        fn new(values: &[u8]) -> Self {
            Self(RefCell::new(values.iter().copied().collect()))
        }
    }

    impl TelemetrySource for Script {
        fn read(&self) -> Result<BatteryReading> {
            let mut q = self.0.borrow_mut();
            let p = if q.len() > 1 { q.pop_front() } else { q.front().copied() };
            p.map(|percentage| BatteryReading { percentage, plugged_in: true, ..Default::default() })
                .ok_or_else(|| ChargeKeeperError::Telemetry("no more readings".into()))
        }
    }

    #[derive(Default)]
    struct FakeClock(RefCell<Vec<Duration>>);

    impl Clock for FakeClock {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    fn modern() -> CapabilitySet {
        CapabilitySet { charging_modern: true, adapter_modern: true, ..Default::default() }
    }

    fn persisted(target: &ChargeTarget) -> MemoryStateStore {
        let store = MemoryStateStore::new();
        store.save_target(target).unwrap();
        store
    }

    /// Telemetry that runs `stop` on the store during the first read
    struct StopDuringFirstRead<'a> {
        inner: Script,
        store: &'a MemoryStateStore,
        replace_with: Option<ChargeTarget>,
        done: RefCell<bool>,
    }

    impl TelemetrySource for StopDuringFirstRead<'_> {
        fn read(&self) -> Result<BatteryReading> {
            if !self.done.replace(true) {
                match &self.replace_with {
                    Some(t) => self.store.save_target(t)?,
                    None => self.store.clear_target()?,
                }
            }
            self.inner.read()
        }
    }

    #[test]
    fn test_maintain_toggles_once_per_crossing() {
        let target = ChargeTarget::percentage(80).unwrap();
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), persisted(&target));
        *smc.charging_off.lock().unwrap() = true;
        let telemetry = Script::new(&[75, 79, 80, 82, 79, 80]);
        let sup = Supervisor::new(&smc, modern(), &telemetry, &clock, &store);

        sup.maintain(&target, Some(6)).unwrap();

        use RegisterWrite::*;
        assert_eq!(
            *smc.writes.lock().unwrap(),
            vec![
                ChargingModernOn,
                Led(LedColor::Orange),
                ChargingModernOff,
                Led(LedColor::Green),
                ChargingModernOn,
                Led(LedColor::Orange),
                ChargingModernOff,
                Led(LedColor::Green),
            ]
        );
        assert_eq!(clock.0.borrow().len(), 6);
        assert!(clock.0.borrow().iter().all(|d| *d == timing::MAINTAIN_INTERVAL));
    }

    #[test]
    fn test_stop_ends_loop_at_next_tick() {
        let target = ChargeTarget::percentage(80).unwrap();
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), persisted(&target));
        let telemetry = StopDuringFirstRead {
            inner: Script::new(&[95, 70, 90]),
            store: &store,
            replace_with: None,
            done: RefCell::new(false),
        };
        let sup = Supervisor::new(&smc, modern(), &telemetry, &clock, &store);

        sup.maintain(&target, Some(3)).unwrap();

        use RegisterWrite::*;
        assert_eq!(store.load_target().unwrap(), None);
        assert_eq!(*smc.writes.lock().unwrap(), vec![ChargingModernOff, Led(LedColor::Green)]);
        assert_eq!(clock.0.borrow().len(), 1);
    }

    #[test]
    fn test_new_target_ends_old_loop() {
        let target = ChargeTarget::percentage(80).unwrap();
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), persisted(&target));
        let telemetry = StopDuringFirstRead {
            inner: Script::new(&[75, 95, 95]),
            store: &store,
            replace_with: Some(ChargeTarget::range(50, 60).unwrap()),
            done: RefCell::new(false),
        };
        *smc.charging_off.lock().unwrap() = true;
        let sup = Supervisor::new(&smc, modern(), &telemetry, &clock, &store);

        sup.maintain(&target, Some(3)).unwrap();

        use RegisterWrite::*;
        assert_eq!(*smc.writes.lock().unwrap(), vec![ChargingModernOn, Led(LedColor::Orange)]);
    }

    #[test]
    fn test_force_discharge_stops_with_target() {
        let target = ChargeTarget::range(70, 80).unwrap().with_force_discharge(true);
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), MemoryStateStore::new());
        let telemetry = Script::new(&[90]);
        let sup = Supervisor::new(&smc, modern(), &telemetry, &clock, &store);

        sup.maintain(&target, None).unwrap();

        use RegisterWrite::*;
        assert_eq!(*smc.writes.lock().unwrap(), vec![ChargingModernOff, AdapterModernOff, AdapterModernOn]);
        assert!(clock.0.borrow().is_empty());
    }

    #[test]
    fn test_force_discharge_runs_first() {
        let target = ChargeTarget::range(70, 80).unwrap().with_force_discharge(true);
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), persisted(&target));
        let telemetry = Script::new(&[90, 85, 70]);
        let sup = Supervisor::new(&smc, modern(), &telemetry, &clock, &store);

        sup.maintain(&target, Some(0)).unwrap();

        use RegisterWrite::*;
        assert_eq!(*smc.writes.lock().unwrap(), vec![ChargingModernOff, AdapterModernOff, AdapterModernOn]);
    }

    #[test]
    fn test_converge_cadence() {
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), MemoryStateStore::new());
        let telemetry = Script::new(&[80, 86, 88, 90]);
        let sup = Supervisor::new(&smc, modern(), &telemetry, &clock, &store);

        sup.converge(Converge::Charge(90)).unwrap();

        let secs: Vec<u64> = clock.0.borrow().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![60, 60, 20]);
        assert_eq!(smc.writes.lock().unwrap().last(), Some(&RegisterWrite::ChargingModernOff));
    }

    #[test]
    fn test_calibration_releases_lock_before_resume() {
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), MemoryStateStore::new());
        store.acquire_lock(Role::Calibrate, 4242).unwrap();
        let telemetry = Script::new(&[50, 30, 15, 60, 100, 90, 80]);
        let sup = Supervisor::new(&smc, modern(), &telemetry, &clock, &store);

        let mut resumed = 0;
        sup.calibrate(|| {
            assert_eq!(store.load_lock(Role::Calibrate).unwrap(), None);
            resumed += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(resumed, 1);
        assert!(clock.0.borrow().contains(&timing::CALIBRATION_HOLD));
    }

    #[test]
    fn test_no_keys_means_no_writes() {
        let target = ChargeTarget::percentage(80).unwrap();
        let (smc, clock, store) = (FakeSmc::default(), FakeClock::default(), persisted(&target));
        let telemetry = Script::new(&[95]);
        let sup = Supervisor::new(&smc, CapabilitySet::default(), &telemetry, &clock, &store);

        sup.maintain(&target, Some(3)).unwrap();

        let writes = smc.writes.lock().unwrap();
        assert!(writes.iter().all(|w| matches!(w, RegisterWrite::Led(_))));
    }
}
