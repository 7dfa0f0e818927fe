//! Charge state machine
//!
//! [`transition`] is pure: given what the hardware reports and the target bounds it
//! returns the next state and the effects to apply. Effects are only emitted on an
//! actual change of charging state, so a battery sitting on a bound causes no
//! repeated register writes.

use std::time::Duration;

use crate::constants::timing;
use crate::data::Bounds;
use crate::hw::smc::LedColor;
use crate::hw::telemetry::BatteryReading;

/// Side effect requested by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    EnableCharging,
    DisableCharging,
    EnableDischarge,
    DisableDischarge,
    SetLed(LedColor),
}

/// What the machine believes about the charger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChargeState {
    pub charging_enabled: bool,
}

impl ChargeState {
    pub fn new(charging_enabled: bool) -> Self {
        Self { charging_enabled }
    }
}

/// One step of the maintenance loop
///
/// At or above the upper bound a charger that is still charging is switched off;
/// below the lower bound a disabled charger is switched on. Between the bounds
/// nothing changes. A voltage target with no voltage reading does nothing.
///
/// "Still charging" is the believed register state, or the OS reporting a charge
/// off the adapter. The latter catches firmware that re-enabled charging behind
/// our back, e.g. across sleep.
pub fn transition(state: ChargeState, reading: &BatteryReading, bounds: Bounds) -> (ChargeState, Vec<Effect>) {
    let (value, lower, upper) = match bounds {
        Bounds::Percent { lower, upper } => (f32::from(reading.percentage), f32::from(lower), f32::from(upper)),
        Bounds::Volts { lower, upper } => match reading.voltage {
            Some(v) => (v, lower, upper),
            None => return (state, Vec::new()),
        },
    };

    let charging = state.charging_enabled || (reading.plugged_in && reading.os_charging);
    if value >= upper && charging {
        (ChargeState::new(false), vec![Effect::DisableCharging, Effect::SetLed(LedColor::Green)])
    } else if value < lower && !state.charging_enabled {
        (ChargeState::new(true), vec![Effect::EnableCharging, Effect::SetLed(LedColor::Orange)])
    } else {
        (state, Vec::new())
    }
}

/// Direction of a one-shot convergence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converge {
    /// Charge until at least this percentage
    Charge(u8),
    /// Discharge until at most this percentage
    Discharge(u8),
}

impl Converge {
    pub fn target(self) -> u8 {
        match self {
            Converge::Charge(t) | Converge::Discharge(t) => t,
        }
    }

    pub fn reached(self, percentage: u8) -> bool {
        match self {
            Converge::Charge(t) => percentage >= t,
            Converge::Discharge(t) => percentage <= t,
        }
    }

    /// Effects that start the convergence
    pub fn start_effects(self) -> Vec<Effect> {
        match self {
            Converge::Charge(_) => vec![Effect::DisableDischarge, Effect::EnableCharging],
            Converge::Discharge(_) => vec![Effect::DisableCharging, Effect::EnableDischarge],
        }
    }

    /// Effects once the target is reached
    pub fn finish_effects(self) -> Vec<Effect> {
        match self {
            Converge::Charge(_) => vec![Effect::DisableCharging],
            Converge::Discharge(_) => vec![Effect::DisableDischarge],
        }
    }

    /// Polling interval given the current percentage
    pub fn interval(self, percentage: u8) -> Duration {
        converge_interval(percentage, self.target())
    }
}

/// Faster polling close to the target so it is not overshot
pub fn converge_interval(current: u8, target: u8) -> Duration {
    if current.abs_diff(target) <= timing::CONVERGE_NEAR_POINTS {
        timing::CONVERGE_NEAR_INTERVAL
    } else {
        timing::CONVERGE_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pct(p: u8) -> BatteryReading {
        BatteryReading { percentage: p, plugged_in: true, ..Default::default() }
    }

    fn run(start: bool, readings: &[u8], bounds: Bounds) -> Vec<Vec<Effect>> {
        let mut state = ChargeState::new(start);
        readings
            .iter()
            .map(|p| {
                let (next, effects) = transition(state, &pct(*p), bounds);
                state = next;
                effects
            })
            .collect()
    }

    #[test]
    fn test_single_target_hysteresis() {
        use Effect::*;
        let out = run(false, &[75, 79, 80, 82, 79, 80], Bounds::Percent { lower: 80, upper: 80 });
        assert_eq!(
            out,
            vec![
                vec![EnableCharging, SetLed(LedColor::Orange)],
                vec![],
                vec![DisableCharging, SetLed(LedColor::Green)],
                vec![],
                vec![EnableCharging, SetLed(LedColor::Orange)],
                vec![DisableCharging, SetLed(LedColor::Green)],
            ]
        );
    }

    #[test]
    fn test_range_stays_quiet_inside_bounds() {
        let bounds = Bounds::Percent { lower: 70, upper: 80 };
        let out = run(true, &[72, 78, 80, 79, 75, 70, 69, 75], bounds);
        let writes: Vec<usize> = out.iter().enumerate().filter(|(_, e)| !e.is_empty()).map(|(i, _)| i).collect();
        assert_eq!(writes, vec![2, 6]);
    }

    #[test]
    fn test_no_repeated_writes_at_bound() {
        let out = run(true, &[90, 90, 90, 90], Bounds::Percent { lower: 80, upper: 80 });
        assert_eq!(out.iter().filter(|e| !e.is_empty()).count(), 1);
    }

    #[test]
    fn test_os_charging_on_adapter_is_cut_off() {
        let bounds = Bounds::Percent { lower: 70, upper: 80 };
        let mut r = pct(85);
        r.os_charging = true;
        let (s, e) = transition(ChargeState::new(false), &r, bounds);
        assert!(!s.charging_enabled);
        assert_eq!(e, vec![Effect::DisableCharging, Effect::SetLed(LedColor::Green)]);

        // Not plugged in: the OS flag alone is not trusted
        r.plugged_in = false;
        assert!(transition(ChargeState::new(false), &r, bounds).1.is_empty());

        // Plugged in but idle: nothing to cut
        r.plugged_in = true;
        r.os_charging = false;
        assert!(transition(ChargeState::new(false), &r, bounds).1.is_empty());
    }

    #[test]
    fn test_voltage_bounds() {
        let bounds = Bounds::Volts { lower: 11.1, upper: 11.7 };
        let mut r = pct(50);
        r.voltage = Some(11.8);
        let (s, e) = transition(ChargeState::new(true), &r, bounds);
        assert!(!s.charging_enabled);
        assert_eq!(e[0], Effect::DisableCharging);

        r.voltage = Some(11.4);
        assert!(transition(s, &r, bounds).1.is_empty());

        r.voltage = None;
        assert!(transition(ChargeState::new(true), &r, bounds).1.is_empty());
    }

    #[test]
    fn test_converge() {
        assert!(Converge::Charge(90).reached(90));
        assert!(!Converge::Charge(90).reached(89));
        assert!(Converge::Discharge(50).reached(49));
        assert_eq!(Converge::Charge(90).interval(87), timing::CONVERGE_NEAR_INTERVAL);
        assert_eq!(Converge::Charge(90).interval(86), timing::CONVERGE_INTERVAL);
        assert_eq!(converge_interval(53, 50), Duration::from_secs(20));
    }
}
